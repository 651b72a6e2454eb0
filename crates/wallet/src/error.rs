use thiserror::Error;

use tollgate_state::StateError;

/// Errors produced by the wallet service.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The effective wallet chain has no room for the requested amount.
    #[error("wallet {wallet} exhausted: {needed} needed, {available} available")]
    Exhausted {
        wallet: String,
        needed: u64,
        available: u64,
    },

    #[error("wallet not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency retries exhausted under contention.
    #[error("wallet {0} contended beyond retry budget")]
    Contended(String),

    #[error("transfer denied: {0}")]
    TransferDenied(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("wallet state corrupt: {0}")]
    Corrupt(String),
}
