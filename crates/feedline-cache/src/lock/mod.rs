//! Per-key locking.
//!
//! Every read-modify-write on a cached key runs under a lease from a
//! [`Locker`]. Acquisition waits at most `wait`; the guarded section may run
//! at most `hold`. Exceeding either fails the operation with
//! [`FeedError::LockFailure`].

mod local_lock;
mod redis_lock;

pub use local_lock::LocalLocker;
pub use redis_lock::RedisLocker;

use crate::metrics::names;
use async_trait::async_trait;
use feedline_core::{FeedError, FeedResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Bounds on lock acquisition and lock holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Longest time to wait for the lock.
    pub wait: Duration,
    /// Longest time the lock may be held.
    pub hold: Duration,
}

impl LockOptions {
    #[must_use]
    pub const fn new(wait: Duration, hold: Duration) -> Self {
        Self { wait, hold }
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

/// Proof of holding a lock.
///
/// The token identifies the holder so that only the holder can release it.
/// `expires_at` is no later than the moment the lease lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
    pub expires_at: Instant,
}

/// Distributed or in-process lock capability.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Acquires the lock on `key`, waiting at most `options.wait`.
    ///
    /// The lease lapses on its own after `options.hold`.
    async fn acquire(&self, key: &str, options: LockOptions) -> FeedResult<LockLease>;

    /// Releases a lease. Releasing a lapsed lease is not an error.
    async fn release(&self, lease: LockLease) -> FeedResult<()>;
}

/// Extension trait for running work under a lock.
#[async_trait]
pub trait LockerExt: Locker {
    /// Runs `f` while holding the lock on `key`.
    ///
    /// The lock is always released, whether `f` succeeds, fails or overruns
    /// its hold time.
    async fn with_lock<T, F, Fut>(&self, key: &str, options: LockOptions, f: F) -> FeedResult<T>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FeedResult<T>> + Send,
    {
        let lease = match self.acquire(key, options).await {
            Ok(lease) => lease,
            Err(e) => {
                if e.is_lock_failure() {
                    metrics::counter!(names::LOCK_FAILURES_TOTAL, "stage" => "acquire").increment(1);
                }
                return Err(e);
            }
        };

        let outcome = tokio::time::timeout(options.hold, f()).await;

        if let Err(e) = self.release(lease).await {
            warn!(key = %key, error = %e, "Failed to release lock");
        }

        outcome.unwrap_or_else(|_| {
            metrics::counter!(names::LOCK_FAILURES_TOTAL, "stage" => "hold").increment(1);
            Err(FeedError::lock_failure(
                key,
                format!("held longer than {}ms", options.hold.as_millis()),
            ))
        })
    }
}

impl<L: Locker + ?Sized> LockerExt for L {}
