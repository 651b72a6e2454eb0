//! Request-path middleware: correlation, rate limiting, header
//! normalization, and the timeout envelope.
//!
//! Ordering is authoritative and applied in `app()`: authentication, then
//! correlation, then rate limiting, then header normalization, then the
//! timeout wrapper around the handler.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tollgate_core::{CorrelationId, ErrorCode};

use crate::auth::CallerIdentity;
use crate::error::ApiError;
use crate::state::AppState;

/// Inbound/outbound correlation id header.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Client-requested deadline in seconds.
pub const TIMEOUT_HEADER: &str = "x-tollgate-timeout";
/// Feature tag header.
pub const FEATURE_HEADER: &str = "x-tollgate-feature";
/// Priority header (`low` / `normal` / `high`).
pub const PRIORITY_HEADER: &str = "x-tollgate-priority";
/// Explicit data classification header.
pub const CLASSIFICATION_HEADER: &str = "x-tollgate-data-classification";

/// Hard cap on client-requested deadlines.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Headers a client must not set: upstream credentials, SDK telemetry,
/// and provider version pins are stripped before the request proceeds.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "openai-organization",
    "openai-project",
    "openai-beta",
    "anthropic-version",
    "anthropic-beta",
    "x-stainless-arch",
    "x-stainless-lang",
    "x-stainless-os",
    "x-stainless-package-version",
    "x-stainless-runtime",
    "x-stainless-runtime-version",
];

/// Upstream response headers that never reach the client.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "x-ratelimit-limit-requests",
    "x-ratelimit-remaining-requests",
    "x-ratelimit-limit-tokens",
    "x-ratelimit-remaining-tokens",
    "openai-processing-ms",
    "anthropic-request-id",
    "cf-ray",
];

/// Correlation id carried in request extensions.
#[derive(Debug, Clone)]
pub struct Correlation(pub CorrelationId);

/// Request-scoped cancellation handle carried in request extensions.
#[derive(Debug, Clone)]
pub struct RequestCancellation(pub CancellationToken);

/// Assign a correlation id (honoring an inbound `x-request-id`) and thread
/// it into extensions and the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(CorrelationId::generate, CorrelationId::new);

    request
        .extensions_mut()
        .insert(Correlation(correlation_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Per-tenant and per-actor sliding-window rate limiting. Every response
/// carries the limit headers; a 429 additionally carries retry-after.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = request
        .extensions()
        .get::<CallerIdentity>()
        .cloned()
        .ok_or_else(|| ApiError::new(ErrorCode::InternalError, "identity missing"))?;
    let correlation = request.extensions().get::<Correlation>().cloned();

    let (result, policy_id) = match state.limiter.check_tenant(&identity.tenant).await {
        Err(exceeded) => (Err(exceeded), "tenant"),
        Ok(_) => match state.limiter.check_actor(&identity.actor).await {
            Err(exceeded) => (Err(exceeded), "actor"),
            Ok(check) => (Ok(check), "actor"),
        },
    };

    match result {
        Ok(check) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            insert_numeric(headers, "x-ratelimit-limit", check.limit);
            insert_numeric(headers, "x-ratelimit-remaining", check.remaining);
            insert_numeric(headers, "x-ratelimit-reset", check.reset_after);
            if let Ok(value) = HeaderValue::from_str(policy_id) {
                headers.insert(HeaderName::from_static("x-ratelimit-policy"), value);
            }
            Ok(response)
        }
        Err(exceeded) => {
            debug!(tenant = %identity.tenant, actor = %identity.actor, "rate limited");
            let mut error = ApiError::new(ErrorCode::RateLimited, "rate limit exceeded");
            error.retry_after = Some(exceeded.retry_after);
            if let Some(Correlation(id)) = correlation {
                error = error.with_request_id(id.to_string());
            }
            // The limit headers ride on 429s too.
            let mut response = axum::response::IntoResponse::into_response(error);
            let headers = response.headers_mut();
            insert_numeric(headers, "x-ratelimit-limit", exceeded.limit);
            insert_numeric(headers, "x-ratelimit-remaining", 0);
            insert_numeric(headers, "x-ratelimit-reset", exceeded.retry_after);
            if let Ok(value) = HeaderValue::from_str(policy_id) {
                headers.insert(HeaderName::from_static("x-ratelimit-policy"), value);
            }
            Ok(response)
        }
    }
}

fn insert_numeric(headers: &mut axum::http::HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Strip provider-specific headers the client must not set, normalize
/// content negotiation, and stamp gateway identity on the way out.
pub async fn header_middleware(mut request: Request, next: Next) -> Response {
    for name in STRIPPED_REQUEST_HEADERS {
        request.headers_mut().remove(*name);
    }
    if !request.headers().contains_key(axum::http::header::ACCEPT) {
        request.headers_mut().insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(*name);
    }
    headers.insert(
        HeaderName::from_static("x-tollgate-gateway"),
        HeaderValue::from_static(concat!("tollgate/", env!("CARGO_PKG_VERSION"))),
    );
    response
}

/// Resolve the effective deadline and wrap the rest of the chain in a
/// cancellable timeout: client header (capped at five minutes), else the
/// configured default. On expiry the cancellation token fires, downstream
/// work stops, and the client receives `timeout`; any late writes from the
/// handler go nowhere because the response is already sealed.
pub async fn timeout_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let requested = request
        .headers()
        .get(TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let deadline = requested
        .unwrap_or(state.default_timeout)
        .min(MAX_TIMEOUT);

    let cancel = CancellationToken::new();
    request
        .extensions_mut()
        .insert(RequestCancellation(cancel.clone()));
    let correlation = request.extensions().get::<Correlation>().cloned();

    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            cancel.cancel();
            let mut error = ApiError::new(ErrorCode::Timeout, "request deadline exceeded");
            if let Some(Correlation(id)) = correlation {
                error = error.with_request_id(id.to_string());
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_cap_is_five_minutes() {
        assert_eq!(MAX_TIMEOUT, Duration::from_secs(300));
    }

    #[test]
    fn stripped_header_lists_cover_credentials_and_telemetry() {
        assert!(STRIPPED_REQUEST_HEADERS.contains(&"openai-organization"));
        assert!(STRIPPED_REQUEST_HEADERS.contains(&"x-stainless-lang"));
        assert!(STRIPPED_RESPONSE_HEADERS.contains(&"x-ratelimit-remaining-requests"));
    }
}
