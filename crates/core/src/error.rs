use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes surfaced to clients.
///
/// Each code maps to exactly one HTTP status; the mapping is part of the
/// public API contract and must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedRequest,
    AuthenticationFailed,
    WalletExhausted,
    PolicyDenied,
    SecurityViolation,
    RateLimited,
    InternalError,
    UpstreamExhausted,
    UpstreamUnavailable,
    Timeout,
}

impl ErrorCode {
    /// The HTTP status code this error maps to.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::MalformedRequest => 400,
            Self::AuthenticationFailed => 401,
            Self::WalletExhausted => 402,
            Self::PolicyDenied => 403,
            Self::SecurityViolation => 422,
            Self::RateLimited => 429,
            Self::InternalError => 500,
            Self::UpstreamExhausted => 502,
            Self::UpstreamUnavailable => 503,
            Self::Timeout => 504,
        }
    }

    /// The error category reported in the envelope's `type` field.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::MalformedRequest
            | Self::AuthenticationFailed
            | Self::WalletExhausted
            | Self::PolicyDenied
            | Self::SecurityViolation
            | Self::RateLimited => "client_error",
            Self::UpstreamExhausted | Self::UpstreamUnavailable => "upstream_error",
            Self::InternalError | Self::Timeout => "internal_error",
        }
    }

    /// Snake-case wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::AuthenticationFailed => "authentication_failed",
            Self::WalletExhausted => "wallet_exhausted",
            Self::PolicyDenied => "policy_denied",
            Self::SecurityViolation => "security_violation",
            Self::RateLimited => "rate_limited",
            Self::InternalError => "internal_error",
            Self::UpstreamExhausted => "upstream_exhausted",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the request path.
///
/// Every variant carries enough context to build the client-facing error
/// envelope; the correlation id is attached at the HTTP layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("wallet exhausted: {0}")]
    WalletExhausted(String),

    #[error("denied by policy {rule}: {message}")]
    PolicyDenied { rule: String, message: String },

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("all upstream connectors exhausted, last connector {connector}: {message}")]
    UpstreamExhausted { connector: String, message: String },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            Self::WalletExhausted(_) => ErrorCode::WalletExhausted,
            Self::PolicyDenied { .. } => ErrorCode::PolicyDenied,
            Self::SecurityViolation(_) => ErrorCode::SecurityViolation,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::UpstreamExhausted { .. } => ErrorCode::UpstreamExhausted,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::Timeout => ErrorCode::Timeout,
            Self::MalformedRequest(_) => ErrorCode::MalformedRequest,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_authoritative() {
        assert_eq!(ErrorCode::AuthenticationFailed.http_status(), 401);
        assert_eq!(ErrorCode::WalletExhausted.http_status(), 402);
        assert_eq!(ErrorCode::PolicyDenied.http_status(), 403);
        assert_eq!(ErrorCode::SecurityViolation.http_status(), 422);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::UpstreamExhausted.http_status(), 502);
        assert_eq!(ErrorCode::UpstreamUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
    }

    #[test]
    fn error_code_serde_is_snake_case() {
        let json = serde_json::to_string(&ErrorCode::WalletExhausted).unwrap();
        assert_eq!(json, "\"wallet_exhausted\"");
    }

    #[test]
    fn gateway_error_code() {
        let err = GatewayError::RateLimited { retry_after: 30 };
        assert_eq!(err.code(), ErrorCode::RateLimited);
        let err = GatewayError::UpstreamExhausted {
            connector: "openai-us".into(),
            message: "502".into(),
        };
        assert_eq!(err.code(), ErrorCode::UpstreamExhausted);
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorCode::PolicyDenied.category(), "client_error");
        assert_eq!(ErrorCode::UpstreamExhausted.category(), "upstream_error");
        assert_eq!(ErrorCode::Timeout.category(), "internal_error");
    }
}
