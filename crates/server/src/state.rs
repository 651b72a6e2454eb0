use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tollgate_gateway::Gateway;
use tollgate_metering::MemoryAnalyticsSink;

use crate::auth::ApiKeyEntry;
use crate::ratelimit::RateLimiter;

/// Shared state behind every handler and middleware layer.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub limiter: Arc<RateLimiter>,
    /// API key table: `sha256_hex(raw_key)` to entry.
    pub api_keys: Arc<HashMap<String, ApiKeyEntry>>,
    /// In-memory aggregation serving the cost-breakdown endpoint.
    pub analytics: Arc<MemoryAnalyticsSink>,
    /// Deadline applied when the client sends no timeout header.
    pub default_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_keys", &self.api_keys.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
