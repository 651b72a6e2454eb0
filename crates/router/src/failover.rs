use std::time::Duration;

use thiserror::Error;

/// Upstream failures the dispatch loop reacts to.
#[derive(Debug, Clone, Error)]
pub enum UpstreamFailure {
    /// Upstream returned 429. Advance to the next connector immediately.
    #[error("upstream rate limited")]
    RateLimited,

    /// Upstream returned 5xx. Retry the same connector with backoff, then
    /// advance.
    #[error("upstream server error: {status}")]
    ServerError { status: u16, message: String },

    /// Upstream did not answer within the deadline. Advance immediately.
    #[error("upstream timed out")]
    Timeout,

    /// Connect or transport failure. Advance immediately.
    #[error("upstream network error: {0}")]
    Network(String),
}

/// Same-connector retries for 5xx before advancing down the chain.
pub const MAX_SAME_CONNECTOR_RETRIES: u32 = 3;

impl UpstreamFailure {
    /// Whether the same connector should be retried for this failure.
    #[must_use]
    pub fn retry_same_connector(&self) -> bool {
        matches!(self, Self::ServerError { .. })
    }
}

/// Backoff before same-connector retry `attempt` (zero-based):
/// 100 ms, 200 ms, 400 ms.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * (1 << attempt.min(4)))
}
