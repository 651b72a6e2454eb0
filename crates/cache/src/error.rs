use thiserror::Error;

/// Errors produced by the semantic cache and its embedding provider.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("embedding API error: {0}")]
    ApiError(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("cache configuration error: {0}")]
    Configuration(String),
}
