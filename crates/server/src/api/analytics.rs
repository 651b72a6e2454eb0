use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use tollgate_metering::analytics::CostBucket;

use crate::auth::CallerIdentity;
use crate::state::AppState;

/// Filters for the cost breakdown.
#[derive(Debug, Default, Deserialize)]
pub struct CostQuery {
    pub model: Option<String>,
    pub feature: Option<String>,
}

/// Aggregated cost figures, keyed `model/provider/feature`.
#[derive(Debug, Serialize)]
pub struct CostResponse {
    pub tenant: String,
    pub buckets: HashMap<String, CostBucketBody>,
}

#[derive(Debug, Serialize)]
pub struct CostBucketBody {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: u64,
    pub cache_hits: u64,
}

impl From<CostBucket> for CostBucketBody {
    fn from(bucket: CostBucket) -> Self {
        Self {
            requests: bucket.requests,
            input_tokens: bucket.input_tokens,
            output_tokens: bucket.output_tokens,
            cost: bucket.cost,
            cache_hits: bucket.cache_hits,
        }
    }
}

/// `GET /v1/analytics/cost` — in-memory aggregation since process start;
/// durable history lives behind the external analytics sink.
pub async fn cost(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Query(query): Query<CostQuery>,
) -> Json<CostResponse> {
    let buckets = state
        .analytics
        .breakdown(
            &identity.tenant,
            query.model.as_deref(),
            query.feature.as_deref(),
        )
        .into_iter()
        .map(|(key, bucket)| (key, bucket.into()))
        .collect();
    Json(CostResponse {
        tenant: identity.tenant.clone(),
        buckets,
    })
}
