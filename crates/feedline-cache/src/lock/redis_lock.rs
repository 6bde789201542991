//! Redis-based distributed locker.

use super::{LockLease, LockOptions, Locker};
use async_trait::async_trait;
use deadpool_redis::Pool;
use feedline_core::{FeedError, FeedResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Deletes the lock only if the caller still owns it.
const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Distributed locker built on `SET NX PX`.
#[derive(Clone)]
pub struct RedisLocker {
    pool: Arc<Pool>,
    retry_interval: Duration,
}

impl RedisLocker {
    /// Create a new locker polling every 25ms while a lock is contended.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            retry_interval: Duration::from_millis(25),
        }
    }

    /// Set how often a contended lock is retried.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    async fn get_conn(&self) -> FeedResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to get Redis connection: {e}")))
    }

    async fn try_set(&self, key: &str, token: &str, hold: Duration) -> FeedResult<bool> {
        let mut conn = self.get_conn().await?;
        let hold_ms = u64::try_from(hold.as_millis()).unwrap_or(u64::MAX).max(1);

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(hold_ms)
            .query_async(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to lock '{key}': {e}")))?;

        Ok(result.is_some())
    }
}

#[async_trait]
impl Locker for RedisLocker {
    async fn acquire(&self, key: &str, options: LockOptions) -> FeedResult<LockLease> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + options.wait;

        loop {
            let attempt = Instant::now();
            if self.try_set(key, &token, options.hold).await? {
                debug!(key = %key, "Acquired lock");
                return Ok(LockLease {
                    key: key.to_string(),
                    token,
                    expires_at: attempt + options.hold,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FeedError::lock_failure(
                    key,
                    format!("not acquired within {}ms", options.wait.as_millis()),
                ));
            }

            tokio::time::sleep((deadline - now).min(self.retry_interval)).await;
        }
    }

    async fn release(&self, lease: LockLease) -> FeedResult<()> {
        let mut conn = self.get_conn().await?;

        let released: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to unlock '{}': {e}", lease.key)))?;

        debug!(key = %lease.key, released = released > 0, "Released lock");
        Ok(())
    }
}
