pub mod admin;
pub mod analytics;
pub mod chat;
pub mod completions;
pub mod embeddings;
pub mod health;
pub mod openapi;
pub mod wallet;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use tollgate_core::{
    ChatRequest, CorrelationId, Priority, RequestContext, ResponseAugmentation,
};

use crate::auth::CallerIdentity;
use crate::middleware::{CLASSIFICATION_HEADER, FEATURE_HEADER, PRIORITY_HEADER};

/// Build the per-request context from identity, headers, and the request's
/// extension object. Extension fields win over headers.
pub(crate) fn build_context(
    identity: &CallerIdentity,
    correlation_id: &CorrelationId,
    headers: &HeaderMap,
    request: &ChatRequest,
) -> RequestContext {
    let opts = request.tollgate.clone().unwrap_or_default();

    let wallet = opts
        .budget_group
        .clone()
        .unwrap_or_else(|| identity.wallet.clone());
    let feature = opts.feature.clone().or_else(|| header(headers, FEATURE_HEADER));
    let classification = opts
        .data_classification
        .clone()
        .or_else(|| header(headers, CLASSIFICATION_HEADER));
    let priority = match header(headers, PRIORITY_HEADER).as_deref() {
        Some("low") => Priority::Low,
        Some("high") => Priority::High,
        _ => Priority::Normal,
    };

    let mut ctx = RequestContext::new(
        identity.tenant.as_str(),
        identity.actor.as_str(),
        wallet,
        request.model.clone(),
    )
    .with_correlation_id(correlation_id.clone());
    if let Some(team) = &identity.team {
        ctx = ctx.with_team(team.clone());
    }
    if let Some(feature) = feature {
        ctx = ctx.with_feature(feature);
    }
    if let Some(classification) = classification {
        ctx = ctx.with_data_classification(classification);
    }
    if let Some(strategy) = opts.strategy {
        ctx = ctx.with_strategy(strategy);
    }
    ctx.priority = priority;
    ctx
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Mirror the body augmentation into `x-tollgate-*` response headers.
pub(crate) fn mirror_augmentation(headers: &mut HeaderMap, augmentation: &ResponseAugmentation) {
    let pairs: [(&str, String); 8] = [
        ("x-tollgate-provider", augmentation.provider_used.clone()),
        (
            "x-tollgate-model-requested",
            augmentation.model_requested.clone(),
        ),
        ("x-tollgate-model-used", augmentation.model_used.clone()),
        (
            "x-tollgate-routing-reason",
            augmentation.routing_reason.clone(),
        ),
        ("x-tollgate-cost", augmentation.cost.to_string()),
        ("x-tollgate-cache-hit", augmentation.cache_hit.to_string()),
        (
            "x-tollgate-wallet-balance",
            augmentation.wallet_balance.to_string(),
        ),
        (
            "x-tollgate-policy-actions",
            augmentation.policy_actions.join(","),
        ),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}
