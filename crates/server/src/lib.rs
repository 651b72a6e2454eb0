pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod state;
pub mod telemetry;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::state::AppState;

/// Assemble the HTTP application.
///
/// `/healthz` and the API docs are unauthenticated; everything under `/v1`
/// runs the full middleware chain in the authoritative order:
/// authentication, correlation, rate limiting, header normalization,
/// timeout, handler.
pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(api::chat::chat_completions))
        .route("/v1/completions", post(api::completions::completions))
        .route("/v1/embeddings", post(api::embeddings::embeddings))
        .route("/v1/wallet/balance", get(api::wallet::balance))
        .route("/v1/analytics/cost", get(api::analytics::cost))
        .route(
            "/v1/routes",
            get(api::admin::list_routes).post(api::admin::replace_routes),
        )
        .route("/v1/policies", post(api::admin::replace_policies))
        // Layers wrap outward: the last layer added runs first, so this
        // reads innermost to outermost.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::timeout_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::header_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::correlation_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(api::health::healthz))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
