use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use tollgate_core::{TenantId, WalletId};
use tollgate_state::{CasResult, KeyKind, StateKey, StateStore};

use crate::error::WalletError;
use crate::notify::{NotificationSink, ThresholdEvent};
use crate::wallet::{TransferRecord, Wallet, WalletReset};

/// Maximum CAS retries per node before reporting contention.
const DEFAULT_MAX_RETRIES: u32 = 16;

/// Handle for an in-flight reservation across a wallet chain.
///
/// Exactly one of [`commit`](WalletService::commit) or
/// [`release`](WalletService::release) must be called per reservation; a
/// dropped handle leaks its reserved amount until the next period reset.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub tenant: TenantId,
    /// Wallet ids the reservation was applied to, root first.
    pub chain: Vec<WalletId>,
    pub amount: u64,
}

/// Hierarchical budget accounting over a transactional state store.
///
/// Every mutation is an optimistic compare-and-swap loop per node; a
/// request touching N ancestors applies them in root-to-leaf order so
/// concurrent reservations over shared ancestors cannot deadlock.
pub struct WalletService {
    store: Arc<dyn StateStore>,
    notifications: Arc<dyn NotificationSink>,
    max_retries: u32,
}

impl std::fmt::Debug for WalletService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletService")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl WalletService {
    /// Create a service over the given store and notification sink.
    pub fn new(store: Arc<dyn StateStore>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifications,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn key(tenant: &TenantId, id: &WalletId) -> StateKey {
        StateKey::new(tenant.clone(), KeyKind::Wallet, id.as_str())
    }

    /// Create a wallet node. Fails if the id already exists, if the parent
    /// is missing, or if the ancestor path contains the node itself
    /// (cycle prevention at insert time).
    pub async fn create(&self, wallet: Wallet) -> Result<(), WalletError> {
        if wallet.ancestor_path.contains(&wallet.id) {
            return Err(WalletError::Corrupt(format!(
                "wallet {} appears in its own ancestor path",
                wallet.id
            )));
        }
        if let Some(parent) = &wallet.parent {
            self.load(&wallet.tenant, parent).await?;
        }
        let json = serde_json::to_string(&wallet)
            .map_err(|e| WalletError::Corrupt(e.to_string()))?;
        let key = Self::key(&wallet.tenant, &wallet.id);
        match self.store.compare_and_swap(&key, 0, &json, None).await? {
            CasResult::Ok => Ok(()),
            CasResult::Conflict { .. } => Err(WalletError::Corrupt(format!(
                "wallet {} already exists",
                wallet.id
            ))),
        }
    }

    /// Load a wallet with its store version.
    pub async fn load(
        &self,
        tenant: &TenantId,
        id: &WalletId,
    ) -> Result<(Wallet, u64), WalletError> {
        let key = Self::key(tenant, id);
        let Some((json, version)) = self.store.get_versioned(&key).await? else {
            return Err(WalletError::NotFound(id.to_string()));
        };
        let wallet = serde_json::from_str(&json)
            .map_err(|e| WalletError::Corrupt(format!("wallet {id}: {e}")))?;
        Ok((wallet, version))
    }

    /// Apply `mutate` to a wallet under a CAS loop with bounded backoff.
    ///
    /// `mutate` returning `Err` aborts without writing. Returns the wallet
    /// as written.
    async fn mutate<F>(
        &self,
        tenant: &TenantId,
        id: &WalletId,
        mut mutate: F,
    ) -> Result<Wallet, WalletError>
    where
        F: FnMut(&mut Wallet) -> Result<(), WalletError>,
    {
        let key = Self::key(tenant, id);
        for attempt in 0..self.max_retries {
            let (mut wallet, version) = self.load(tenant, id).await?;
            mutate(&mut wallet)?;
            let json = serde_json::to_string(&wallet)
                .map_err(|e| WalletError::Corrupt(e.to_string()))?;
            match self.store.compare_and_swap(&key, version, &json, None).await? {
                CasResult::Ok => return Ok(wallet),
                CasResult::Conflict { .. } => {
                    debug!(wallet = %id, attempt, "wallet CAS conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(1_u64 << attempt.min(5))).await;
                }
            }
        }
        Err(WalletError::Contended(id.to_string()))
    }

    /// Wallet ids the leaf's chain touches, root first.
    fn chain_of(leaf: &Wallet) -> Vec<WalletId> {
        let mut chain = leaf.ancestor_path.clone();
        chain.push(leaf.id.clone());
        chain
    }

    /// Read the effective available amount: the minimum available walking
    /// the chain from root to leaf.
    pub async fn check(
        &self,
        tenant: &TenantId,
        wallet: &WalletId,
        cost: u64,
    ) -> Result<u64, WalletError> {
        let (leaf, _) = self.load(tenant, wallet).await?;
        let mut effective = u64::MAX;
        for id in Self::chain_of(&leaf) {
            let (node, _) = self.load(tenant, &id).await?;
            effective = effective.min(node.available());
        }
        if effective < cost {
            return Err(WalletError::Exhausted {
                wallet: wallet.to_string(),
                needed: cost,
                available: effective,
            });
        }
        Ok(effective)
    }

    /// Atomically increment `reserved` on the wallet and all ancestors.
    ///
    /// If any node lacks room, every increment already applied by this
    /// operation is rolled back before returning `Exhausted`.
    pub async fn reserve(
        &self,
        tenant: &TenantId,
        wallet: &WalletId,
        amount: u64,
    ) -> Result<Reservation, WalletError> {
        let (leaf, _) = self.load(tenant, wallet).await?;
        let chain = Self::chain_of(&leaf);

        let mut applied: Vec<WalletId> = Vec::with_capacity(chain.len());
        for id in &chain {
            let result = self
                .mutate(tenant, id, |node| {
                    if node.available() < amount {
                        return Err(WalletError::Exhausted {
                            wallet: node.id.to_string(),
                            needed: amount,
                            available: node.available(),
                        });
                    }
                    node.reserved += amount;
                    Ok(())
                })
                .await;

            match result {
                Ok(_) => applied.push(id.clone()),
                Err(err) => {
                    self.rollback_reserved(tenant, &applied, amount).await;
                    return Err(err);
                }
            }
        }

        Ok(Reservation {
            tenant: tenant.clone(),
            chain,
            amount,
        })
    }

    /// Undo partial reserved increments after a failed reserve.
    async fn rollback_reserved(&self, tenant: &TenantId, applied: &[WalletId], amount: u64) {
        for id in applied.iter().rev() {
            let result = self
                .mutate(tenant, id, |node| {
                    node.reserved = node.reserved.saturating_sub(amount);
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                // The reservation leaks until reset; surfaced for operators.
                warn!(wallet = %id, error = %e, "failed to roll back reservation");
            }
        }
    }

    /// Move `actual` from reserved to spent on every node in the chain and
    /// release the over-reservation. Fires edge-triggered soft-threshold
    /// notifications for any node whose utilization crossed a configured
    /// threshold.
    ///
    /// `actual` may exceed the reserved amount: a stream that depleted the
    /// wallet mid-flight is allowed to complete, so the overage is billed.
    ///
    /// Returns the leaf wallet's remaining available amount.
    pub async fn commit(
        &self,
        reservation: &Reservation,
        actual: u64,
    ) -> Result<u64, WalletError> {
        let mut events: Vec<ThresholdEvent> = Vec::new();
        let mut leaf_available = 0;

        for id in &reservation.chain {
            // Threshold markers are written in the same CAS as the commit so
            // concurrent commits crossing the same threshold emit it once.
            let mut crossed: Vec<u8> = Vec::new();
            let wallet = self
                .mutate(&reservation.tenant, id, |node| {
                    crossed.clear();
                    node.reserved = node.reserved.saturating_sub(reservation.amount);
                    node.spent += actual;
                    let utilization = node.utilization_percent();
                    let thresholds = node.soft_thresholds.clone();
                    for threshold in thresholds {
                        if utilization >= threshold
                            && !node.notified_thresholds.contains(&threshold)
                        {
                            node.notified_thresholds.push(threshold);
                            crossed.push(threshold);
                        }
                    }
                    Ok(())
                })
                .await?;

            for threshold in crossed {
                events.push(ThresholdEvent {
                    tenant: reservation.tenant.clone(),
                    wallet: id.clone(),
                    threshold_percent: threshold,
                    utilization_percent: wallet.utilization_percent(),
                });
            }

            leaf_available = wallet.available();
        }

        for event in events {
            self.notifications.notify_threshold(event).await;
        }

        Ok(leaf_available)
    }

    /// Return the full reservation to available on every node. Used when a
    /// request fails before consuming any tokens.
    pub async fn release(&self, reservation: &Reservation) -> Result<(), WalletError> {
        for id in &reservation.chain {
            self.mutate(&reservation.tenant, id, |node| {
                node.reserved = node.reserved.saturating_sub(reservation.amount);
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Move budget between two wallets of the same tenant. Requires a named
    /// approver; records an immutable transfer entry in the store.
    pub async fn transfer(
        &self,
        tenant: &TenantId,
        from: &WalletId,
        to: &WalletId,
        amount: u64,
        approver: &str,
    ) -> Result<TransferRecord, WalletError> {
        if approver.trim().is_empty() {
            return Err(WalletError::TransferDenied(
                "transfer requires an approver".into(),
            ));
        }
        self.mutate(tenant, from, |node| {
            if node.hard_limit.saturating_sub(node.spent + node.reserved) < amount {
                return Err(WalletError::TransferDenied(format!(
                    "wallet {} has insufficient unencumbered budget",
                    node.id
                )));
            }
            node.hard_limit -= amount;
            Ok(())
        })
        .await?;
        self.mutate(tenant, to, |node| {
            node.hard_limit += amount;
            Ok(())
        })
        .await?;

        let record = TransferRecord {
            id: uuid::Uuid::now_v7().to_string(),
            tenant: tenant.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
            approver: approver.to_owned(),
            transferred_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| WalletError::Corrupt(e.to_string()))?;
        let key = StateKey::new(
            tenant.clone(),
            KeyKind::Custom("wallet_transfer".into()),
            &record.id,
        );
        self.store.set(&key, &json, None).await?;
        Ok(record)
    }

    /// Zero `spent` at the period boundary. Reserved amounts are preserved
    /// so in-flight requests continue; notified thresholds are cleared so
    /// the next period can re-emit.
    pub async fn reset(
        &self,
        tenant: &TenantId,
        wallet: &WalletId,
    ) -> Result<WalletReset, WalletError> {
        let mut previous_spent = 0;
        let mut preserved_reserved = 0;
        self.mutate(tenant, wallet, |node| {
            previous_spent = node.spent;
            preserved_reserved = node.reserved;
            node.spent = 0;
            node.notified_thresholds.clear();
            node.last_reset_at = Some(Utc::now());
            Ok(())
        })
        .await?;
        Ok(WalletReset {
            wallet: wallet.clone(),
            tenant: tenant.clone(),
            previous_spent,
            preserved_reserved,
            reset_at: Utc::now(),
        })
    }

    /// Leaf wallet state plus the effective available over the chain,
    /// for the balance endpoint.
    pub async fn balance(
        &self,
        tenant: &TenantId,
        wallet: &WalletId,
    ) -> Result<(Wallet, u64), WalletError> {
        let (leaf, _) = self.load(tenant, wallet).await?;
        let mut effective = u64::MAX;
        for id in Self::chain_of(&leaf) {
            let (node, _) = self.load(tenant, &id).await?;
            effective = effective.min(node.available());
        }
        Ok((leaf, effective))
    }
}
