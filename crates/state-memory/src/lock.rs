use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use tollgate_state::error::StateError;
use tollgate_state::lock::{DistributedLock, LockGuard};

/// Pause between acquisition attempts while a lock is held by someone else.
const RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Current holder of a lock: its owning token and when the hold lapses.
#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    until: Instant,
}

impl Holder {
    fn lapsed(&self) -> bool {
        Instant::now() >= self.until
    }
}

/// In-memory [`DistributedLock`].
///
/// Ownership is a process-unique token from an atomic counter. A guard
/// can only release or extend a hold that still carries its token, so a
/// lock lost to TTL expiry and re-acquired by another caller is never
/// disturbed by the original guard.
#[derive(Debug, Default)]
pub struct MemoryDistributedLock {
    holders: Arc<DashMap<String, Holder>>,
    next_token: AtomicU64,
}

impl MemoryDistributedLock {
    /// Create a new in-memory distributed lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryDistributedLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError> {
        // A lapsed hold counts as free.
        self.holders.remove_if(name, |_, holder| holder.lapsed());

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        Ok(match self.holders.entry(name.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(Holder {
                    token,
                    until: Instant::now() + ttl,
                });
                Some(Box::new(TokenGuard {
                    holders: Arc::clone(&self.holders),
                    name: name.to_owned(),
                    token,
                }))
            }
        })
    }

    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError> {
        let give_up = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(name, ttl).await? {
                return Ok(guard);
            }
            if Instant::now() >= give_up {
                return Err(StateError::Timeout(timeout));
            }
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }
}

/// Guard for a lock acquired via [`MemoryDistributedLock`].
#[derive(Debug)]
pub struct TokenGuard {
    holders: Arc<DashMap<String, Holder>>,
    name: String,
    token: u64,
}

#[async_trait]
impl LockGuard for TokenGuard {
    async fn extend(&self, duration: Duration) -> Result<(), StateError> {
        let renewed = self.holders.get_mut(&self.name).is_some_and(|mut holder| {
            if holder.token == self.token && !holder.lapsed() {
                holder.until = Instant::now() + duration;
                true
            } else {
                false
            }
        });
        if renewed {
            Ok(())
        } else {
            Err(StateError::LockExpired(self.name.clone()))
        }
    }

    async fn release(self: Box<Self>) -> Result<(), StateError> {
        self.holders
            .remove_if(&self.name, |_, holder| holder.token == self.token);
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StateError> {
        Ok(self
            .holders
            .get(&self.name)
            .is_some_and(|holder| holder.token == self.token && !holder.lapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release() {
        let lock = MemoryDistributedLock::new();

        let guard = lock
            .try_acquire("l1", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("should acquire");
        assert!(guard.is_held().await.unwrap());

        // Second acquire fails while held.
        assert!(lock
            .try_acquire("l1", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());

        guard.release().await.unwrap();

        assert!(lock
            .try_acquire("l1", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_after_ttl() {
        let lock = MemoryDistributedLock::new();

        let guard = lock
            .try_acquire("expire-lock", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("should acquire");

        assert!(guard.is_held().await.unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(!guard.is_held().await.unwrap());

        let guard2 = lock
            .try_acquire("expire-lock", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(guard2.is_some(), "should acquire after TTL expiry");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_guard_cannot_release_new_hold() {
        let lock = MemoryDistributedLock::new();

        let stale = lock
            .try_acquire("l1", Duration::from_secs(1))
            .await
            .unwrap()
            .expect("should acquire");

        tokio::time::advance(Duration::from_secs(2)).await;

        // A new caller takes over after the TTL lapsed.
        let fresh = lock
            .try_acquire("l1", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("should acquire after lapse");

        // The stale guard's release must not evict the new hold.
        stale.release().await.unwrap();
        assert!(fresh.is_held().await.unwrap());
        assert!(fresh.extend(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn extend_fails_after_lapse() {
        let lock = MemoryDistributedLock::new();

        let guard = lock
            .try_acquire("l1", Duration::from_secs(1))
            .await
            .unwrap()
            .expect("should acquire");

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(matches!(
            guard.extend(Duration::from_secs(5)).await,
            Err(StateError::LockExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout() {
        let lock = MemoryDistributedLock::new();

        let _guard = lock
            .try_acquire("timeout-lock", Duration::from_secs(60))
            .await
            .unwrap()
            .expect("should acquire");

        let result = lock
            .acquire(
                "timeout-lock",
                Duration::from_secs(5),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(StateError::Timeout(_))));
    }

    #[tokio::test]
    async fn concurrent_lock_contention() {
        let lock = Arc::new(MemoryDistributedLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();

        for _ in 0..10 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let guard = lock
                    .acquire(
                        "contention-lock",
                        Duration::from_millis(200),
                        Duration::from_secs(5),
                    )
                    .await
                    .expect("should eventually acquire");

                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

                guard.release().await.expect("release should succeed");
            }));
        }

        for h in handles {
            h.await.expect("task should not panic");
        }

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 10);
    }
}
