use async_trait::async_trait;

use crate::error::LedgerError;
use crate::record::{LedgerPage, LedgerQuery, LedgerRecord};

/// Trait for ledger storage backends.
///
/// Backends store records exactly as given; chain positions (sequence and
/// hashes) are assigned by the [`LedgerWriter`](crate::writer::LedgerWriter),
/// which serializes appends per tenant.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a sealed record. The store must reject a sequence that is not
    /// exactly one past the tenant's current tail.
    async fn append(&self, record: LedgerRecord) -> Result<(), LedgerError>;

    /// The tenant's latest `(sequence, record_hash)`, or `None` for an empty
    /// chain.
    async fn tail(&self, tenant: &str) -> Result<Option<(u64, String)>, LedgerError>;

    /// Query records with filters and pagination, ordered by sequence.
    async fn query(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError>;

    /// All records for a tenant in sequence order, for chain verification.
    async fn chain(&self, tenant: &str) -> Result<Vec<LedgerRecord>, LedgerError>;
}
