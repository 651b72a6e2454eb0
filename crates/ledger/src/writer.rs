use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::LedgerError;
use crate::record::{GENESIS_HASH, LedgerDraft, LedgerRecord};
use crate::store::LedgerStore;

/// Result of verifying a tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub records: u64,
    pub intact: bool,
    /// First broken sequence, when not intact.
    pub broken_at: Option<u64>,
    pub reason: Option<String>,
}

/// Serializes ledger appends per tenant so sequences stay dense and each
/// record hashes its true predecessor.
///
/// Appends for different tenants proceed concurrently; only same-tenant
/// appends queue on the tenant's mutex.
pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for LedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerWriter").finish_non_exhaustive()
    }
}

impl LedgerWriter {
    /// Create a writer over the given store.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            tenant_locks: DashMap::new(),
        }
    }

    /// The underlying store, for queries.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn lock_for(&self, tenant: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Seal a draft at the tenant's chain tail and persist it.
    pub async fn append(&self, draft: LedgerDraft) -> Result<LedgerRecord, LedgerError> {
        let lock = self.lock_for(draft.tenant.as_str());
        let _guard = lock.lock().await;

        let (sequence, prev_hash) = match self.store.tail(draft.tenant.as_str()).await? {
            Some((tail_sequence, tail_hash)) => (tail_sequence + 1, tail_hash),
            None => (1, GENESIS_HASH.to_owned()),
        };
        let record = LedgerRecord::seal(draft, sequence, &prev_hash);
        self.store.append(record.clone()).await?;
        Ok(record)
    }

    /// Linear verification pass over a tenant's chain: hashes link, hashes
    /// recompute, and sequence numbers are dense from 1.
    pub async fn verify_chain(&self, tenant: &str) -> Result<ChainReport, LedgerError> {
        let chain = self.store.chain(tenant).await?;
        let mut prev_hash = GENESIS_HASH.to_owned();

        for (index, record) in chain.iter().enumerate() {
            let expected_sequence = index as u64 + 1;
            if record.sequence != expected_sequence {
                return Ok(ChainReport {
                    records: chain.len() as u64,
                    intact: false,
                    broken_at: Some(record.sequence),
                    reason: Some(format!(
                        "sequence gap: expected {expected_sequence}, found {}",
                        record.sequence
                    )),
                });
            }
            if record.prev_hash != prev_hash {
                return Ok(ChainReport {
                    records: chain.len() as u64,
                    intact: false,
                    broken_at: Some(record.sequence),
                    reason: Some("previous-hash link mismatch".into()),
                });
            }
            if record.compute_hash() != record.record_hash {
                return Ok(ChainReport {
                    records: chain.len() as u64,
                    intact: false,
                    broken_at: Some(record.sequence),
                    reason: Some("record content does not match its hash".into()),
                });
            }
            prev_hash = record.record_hash.clone();
        }

        Ok(ChainReport {
            records: chain.len() as u64,
            intact: true,
            broken_at: None,
            reason: None,
        })
    }
}
