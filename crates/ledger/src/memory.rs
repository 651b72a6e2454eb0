use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::LedgerError;
use crate::record::{LedgerPage, LedgerQuery, LedgerRecord};
use crate::store::LedgerStore;

/// In-memory [`LedgerStore`] keeping one append-only vector per tenant.
#[derive(Default)]
pub struct MemoryLedgerStore {
    chains: RwLock<HashMap<String, Vec<LedgerRecord>>>,
}

impl MemoryLedgerStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedgerStore")
            .field("tenants", &self.chains.read().len())
            .finish()
    }
}

fn matches(record: &LedgerRecord, query: &LedgerQuery) -> bool {
    if let Some(tenant) = &query.tenant {
        if record.tenant != *tenant {
            return false;
        }
    }
    if let Some(actor) = &query.actor {
        if record.actor.as_str() != actor {
            return false;
        }
    }
    if let Some(feature) = &query.feature {
        if record.feature.as_deref() != Some(feature.as_str()) {
            return false;
        }
    }
    if let Some(model) = &query.model_used {
        if record.model_used != *model {
            return false;
        }
    }
    if let Some(provider) = &query.provider {
        if record.provider.as_str() != provider {
            return false;
        }
    }
    if let Some(correlation_id) = &query.correlation_id {
        if record.correlation_id.as_str() != correlation_id {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if record.recorded_at < *from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if record.recorded_at > *to {
            return false;
        }
    }
    true
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        let mut chains = self.chains.write();
        let chain = chains.entry(record.tenant.to_string()).or_default();
        let expected = chain.last().map_or(1, |last| last.sequence + 1);
        if record.sequence != expected {
            return Err(LedgerError::ChainBroken {
                sequence: record.sequence,
                reason: format!("expected sequence {expected}"),
            });
        }
        chain.push(record);
        Ok(())
    }

    async fn tail(&self, tenant: &str) -> Result<Option<(u64, String)>, LedgerError> {
        let chains = self.chains.read();
        Ok(chains
            .get(tenant)
            .and_then(|chain| chain.last())
            .map(|last| (last.sequence, last.record_hash.clone())))
    }

    async fn query(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError> {
        let chains = self.chains.read();
        let mut hits: Vec<LedgerRecord> = chains
            .values()
            .flatten()
            .filter(|r| matches(r, query))
            .cloned()
            .collect();
        hits.sort_by_key(|r| (r.tenant.to_string(), r.sequence));

        let total = hits.len() as u64;
        let offset = query.effective_offset() as usize;
        let limit = query.effective_limit() as usize;
        let records = hits.into_iter().skip(offset).take(limit).collect();

        Ok(LedgerPage {
            records,
            total,
            limit: query.effective_limit(),
            offset: query.effective_offset(),
        })
    }

    async fn chain(&self, tenant: &str) -> Result<Vec<LedgerRecord>, LedgerError> {
        let chains = self.chains.read();
        Ok(chains.get(tenant).cloned().unwrap_or_default())
    }
}
