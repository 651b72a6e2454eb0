use thiserror::Error;

/// Errors produced by ledger storage and verification.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger backend error: {0}")]
    Backend(String),

    #[error("ledger chain broken at sequence {sequence}: {reason}")]
    ChainBroken { sequence: u64, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
