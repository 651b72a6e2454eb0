use std::time::Duration;

use thiserror::Error;

/// Errors produced by state store and lock backends.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock expired or lost: {0}")]
    LockExpired(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
