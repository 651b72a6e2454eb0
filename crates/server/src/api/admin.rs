use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::info;

use tollgate_core::RoutingRule;
use tollgate_policy::ScanPolicy;

use crate::auth::CallerIdentity;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RulesReply {
    pub active_rules: usize,
}

/// `POST /v1/routes` — replace the routing rule set. Unknown fields in
/// rule bodies are rejected at deserialization.
pub async fn replace_routes(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(rules): Json<Vec<RoutingRule>>,
) -> Json<RulesReply> {
    info!(actor = %identity.actor, rules = rules.len(), "routing rules replaced");
    state.gateway.replace_rules(rules);
    Json(RulesReply {
        active_rules: state.gateway.rules().len(),
    })
}

/// `GET /v1/routes` — the active rule set in evaluation order.
pub async fn list_routes(State(state): State<AppState>) -> Json<Vec<RoutingRule>> {
    Json(state.gateway.rules())
}

/// `POST /v1/policies` — replace the security-scan policy.
pub async fn replace_policies(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(policy): Json<ScanPolicy>,
) -> Json<ScanPolicy> {
    info!(actor = %identity.actor, "scan policy replaced");
    state.gateway.replace_scan_policy(policy);
    Json(state.gateway.scan_policy())
}
