use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;

/// A held lock. Dropping a guard without calling
/// [`release`](LockGuard::release) leaves the lock to expire via its TTL.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Extend the lock's TTL from now.
    async fn extend(&self, duration: Duration) -> Result<(), StateError>;

    /// Release the lock if still owned.
    async fn release(self: Box<Self>) -> Result<(), StateError>;

    /// Whether this guard still owns the lock.
    async fn is_held(&self) -> Result<bool, StateError>;
}

/// A distributed mutual-exclusion primitive with TTL-based expiry.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempt to acquire the named lock without waiting.
    /// Returns `None` if the lock is currently held.
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError>;

    /// Acquire the named lock, waiting up to `timeout`.
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError>;
}
