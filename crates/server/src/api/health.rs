use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ConnectorHealthBody {
    pub connector: String,
    pub state: String,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub connectors: Vec<ConnectorHealthBody>,
}

/// `GET /healthz` — liveness plus per-connector health. Unauthenticated.
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, body = HealthResponse)),
    tag = "operations",
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let connectors = state
        .gateway
        .health()
        .snapshot()
        .into_iter()
        .map(|(connector, health, p95_us)| ConnectorHealthBody {
            connector: connector.to_string(),
            state: health.to_string(),
            #[allow(clippy::cast_precision_loss)]
            p95_latency_ms: p95_us as f64 / 1_000.0,
        })
        .collect();
    Json(HealthResponse {
        status: "ok".to_owned(),
        connectors,
    })
}
