use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tollgate_state::{KeyKind, StateKey, StateStore};

use crate::config::{RateLimitConfig, RateLimitTier};

/// Synthetic tenant under which rate-limit counters are stored.
const SYSTEM_TENANT: &str = "_system";

/// Result of an allowed rate limit check.
#[derive(Debug, Clone)]
pub struct RateCheck {
    /// The configured limit for this tier.
    pub limit: u64,
    /// Approximate remaining requests in the current window.
    pub remaining: u64,
    /// Seconds until the current window resets.
    pub reset_after: u64,
}

/// Returned when the rate limit is exceeded.
#[derive(Debug, Clone)]
pub struct RateExceeded {
    /// Seconds until the caller can retry.
    pub retry_after: u64,
    /// The configured limit.
    pub limit: u64,
}

/// Distributed rate limiter over counters in the shared state store, so
/// every gateway instance sees the same windows.
///
/// Time is cut into fixed slots of the tier's window length. A check adds
/// the current slot's count to a linearly decaying share of the previous
/// slot, which stops a burst straddling a slot edge from doubling the
/// limit. The decay is integer math; the admission error at slot edges is
/// a few percent at worst. Store failures admit the request — throttling
/// is protection, not accounting.
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RateLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<dyn StateStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check and record a request for a tenant.
    pub async fn check_tenant(&self, tenant: &str) -> Result<RateCheck, RateExceeded> {
        let tier = self
            .config
            .tenant_overrides
            .get(tenant)
            .copied()
            .unwrap_or(self.config.tenant);
        self.check(&format!("tenant:{tenant}"), tier).await
    }

    /// Check and record a request for an actor.
    pub async fn check_actor(&self, actor: &str) -> Result<RateCheck, RateExceeded> {
        self.check(&format!("actor:{actor}"), self.config.actor).await
    }

    async fn check(&self, bucket: &str, tier: RateLimitTier) -> Result<RateCheck, RateExceeded> {
        let slot = tier.window_seconds.max(1);
        let limit = tier.requests_per_window;
        let now = unix_now();
        let index = now / slot;
        let remaining_window = slot - now % slot;

        let Some(previous) = self.slot_count(bucket, slot, index.checked_sub(1)).await else {
            return Ok(Self::admit_on_error(tier));
        };
        let Some(current) = self.slot_count(bucket, slot, Some(index)).await else {
            return Ok(Self::admit_on_error(tier));
        };

        // The previous slot contributes its count scaled by how much of the
        // sliding window still overlaps it.
        let carryover = previous.saturating_mul(remaining_window) / slot;
        let used = carryover.saturating_add(current);
        if used >= limit {
            return Err(RateExceeded {
                retry_after: remaining_window.max(1),
                limit,
            });
        }

        // Keep the counter around long enough to serve as next slot's
        // carryover source.
        let retain = Duration::from_secs(slot.saturating_mul(2));
        if let Err(e) = self
            .store
            .increment(&Self::slot_key(bucket, slot, index), 1, Some(retain))
            .await
        {
            tracing::warn!(error = %e, "rate limiter could not record the request");
            return Ok(Self::admit_on_error(tier));
        }

        Ok(RateCheck {
            limit,
            remaining: limit.saturating_sub(used + 1),
            reset_after: remaining_window,
        })
    }

    /// Read one slot's counter. A missing slot reads as zero; `None` flags
    /// a store failure.
    async fn slot_count(&self, bucket: &str, slot: u64, index: Option<u64>) -> Option<u64> {
        let index = index?;
        match self.store.get(&Self::slot_key(bucket, slot, index)).await {
            Ok(value) => Some(value.and_then(|v| v.parse().ok()).unwrap_or(0)),
            Err(e) => {
                tracing::warn!(error = %e, "rate limiter could not read a window slot");
                None
            }
        }
    }

    /// The slot length is part of the key, so a reconfigured window starts
    /// from fresh counters instead of misreading old ones.
    fn slot_key(bucket: &str, slot: u64, index: u64) -> StateKey {
        StateKey::new(
            SYSTEM_TENANT,
            KeyKind::RateLimit,
            format!("{bucket}@{slot}s#{index}"),
        )
    }

    fn admit_on_error(tier: RateLimitTier) -> RateCheck {
        RateCheck {
            limit: tier.requests_per_window,
            remaining: tier.requests_per_window,
            reset_after: tier.window_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use tollgate_state_memory::MemoryStateStore;

    use super::*;

    fn limiter(limit: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStateStore::new()),
            RateLimitConfig {
                tenant: RateLimitTier {
                    requests_per_window: limit,
                    window_seconds: 60,
                },
                actor: RateLimitTier {
                    requests_per_window: limit,
                    window_seconds: 60,
                },
                tenant_overrides: std::collections::HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(3);
        for _ in 0..3 {
            assert!(limiter.check_tenant("t1").await.is_ok());
        }
        let rejected = limiter.check_tenant("t1").await.unwrap_err();
        assert_eq!(rejected.limit, 3);
        assert!(rejected.retry_after >= 1);
    }

    #[tokio::test]
    async fn buckets_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.check_tenant("t1").await.is_ok());
        assert!(limiter.check_tenant("t2").await.is_ok());
        assert!(limiter.check_actor("t1").await.is_ok(), "actor bucket separate");
        assert!(limiter.check_tenant("t1").await.is_err());
    }

    #[tokio::test]
    async fn remaining_decrements() {
        let limiter = limiter(5);
        let first = limiter.check_tenant("t1").await.unwrap();
        let second = limiter.check_tenant("t1").await.unwrap();
        assert!(second.remaining < first.remaining || first.remaining == 0);
    }

    #[tokio::test]
    async fn tenant_override_applies() {
        let mut overrides = std::collections::HashMap::new();
        overrides.insert(
            "vip".to_owned(),
            RateLimitTier {
                requests_per_window: 100,
                window_seconds: 60,
            },
        );
        let limiter = RateLimiter::new(
            Arc::new(MemoryStateStore::new()),
            RateLimitConfig {
                tenant: RateLimitTier {
                    requests_per_window: 1,
                    window_seconds: 60,
                },
                actor: RateLimitTier::default(),
                tenant_overrides: overrides,
            },
        );
        assert!(limiter.check_tenant("vip").await.is_ok());
        assert!(limiter.check_tenant("vip").await.is_ok());
        assert!(limiter.check_tenant("other").await.is_ok());
        assert!(limiter.check_tenant("other").await.is_err());
    }

    #[tokio::test]
    async fn different_window_lengths_use_separate_slots() {
        // Same bucket name under two tiers must not share counters.
        let store = Arc::new(MemoryStateStore::new());
        let narrow = RateLimiter::new(
            Arc::clone(&store) as _,
            RateLimitConfig {
                tenant: RateLimitTier {
                    requests_per_window: 1,
                    window_seconds: 60,
                },
                actor: RateLimitTier::default(),
                tenant_overrides: std::collections::HashMap::new(),
            },
        );
        let wide = RateLimiter::new(
            store as _,
            RateLimitConfig {
                tenant: RateLimitTier {
                    requests_per_window: 1,
                    window_seconds: 3_600,
                },
                actor: RateLimitTier::default(),
                tenant_overrides: std::collections::HashMap::new(),
            },
        );

        assert!(narrow.check_tenant("t1").await.is_ok());
        // The wide limiter keeps its own slot for the same bucket.
        assert!(wide.check_tenant("t1").await.is_ok());
        assert!(narrow.check_tenant("t1").await.is_err());
    }
}
