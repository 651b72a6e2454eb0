use thiserror::Error;

/// Errors produced by policy evaluation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The evaluator did not answer within its deadline.
    #[error("policy evaluation timed out after {0} ms")]
    Timeout(u64),

    #[error("policy evaluator unreachable: {0}")]
    Unreachable(String),

    #[error("policy configuration error: {0}")]
    Configuration(String),
}
