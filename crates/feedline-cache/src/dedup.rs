//! Claims on delivered event ids.
//!
//! Counter-mutating consumers claim an event id before applying it, so a
//! redelivered event is acknowledged without being applied twice.

use crate::keys::CacheKeys;
use async_trait::async_trait;
use deadpool_redis::Pool;
use feedline_core::{FeedError, FeedResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remembers which events were already handled.
#[async_trait]
pub trait EventDeduplicator: Send + Sync {
    /// Claims `event_id` within `scope`.
    ///
    /// Returns `true` the first time, `false` for every later delivery while
    /// the claim lives.
    async fn first_delivery(&self, scope: &str, event_id: &str) -> FeedResult<bool>;

    /// Drops a claim so the event can be applied again.
    async fn forget(&self, scope: &str, event_id: &str) -> FeedResult<()>;
}

/// Redis-backed deduplicator using `SET NX EX`.
#[derive(Clone)]
pub struct RedisEventDeduplicator {
    pool: Arc<Pool>,
    keys: CacheKeys,
    ttl: Duration,
}

impl RedisEventDeduplicator {
    #[must_use]
    pub fn new(pool: Arc<Pool>, keys: CacheKeys, ttl: Duration) -> Self {
        Self { pool, keys, ttl }
    }

    async fn get_conn(&self) -> FeedResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl EventDeduplicator for RedisEventDeduplicator {
    async fn first_delivery(&self, scope: &str, event_id: &str) -> FeedResult<bool> {
        let key = self.keys.dedup(scope, event_id);
        let mut conn = self.get_conn().await?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to claim '{key}': {e}")))?;

        Ok(claimed.is_some())
    }

    async fn forget(&self, scope: &str, event_id: &str) -> FeedResult<()> {
        let key = self.keys.dedup(scope, event_id);
        let mut conn = self.get_conn().await?;

        redis::cmd("DEL")
            .arg(&key)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to drop claim '{key}': {e}")))?;
        Ok(())
    }
}

/// In-process deduplicator.
#[derive(Debug)]
pub struct MemoryEventDeduplicator {
    ttl: Duration,
    claims: Mutex<HashMap<(String, String), Instant>>,
}

impl MemoryEventDeduplicator {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            claims: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventDeduplicator for MemoryEventDeduplicator {
    async fn first_delivery(&self, scope: &str, event_id: &str) -> FeedResult<bool> {
        let now = Instant::now();
        let mut claims = self.claims.lock();
        claims.retain(|_, expires_at| *expires_at > now);

        let claim = (scope.to_string(), event_id.to_string());
        if claims.contains_key(&claim) {
            return Ok(false);
        }
        claims.insert(claim, now + self.ttl);
        Ok(true)
    }

    async fn forget(&self, scope: &str, event_id: &str) -> FeedResult<()> {
        self.claims
            .lock()
            .remove(&(scope.to_string(), event_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_delivery_is_detected() {
        let dedup = MemoryEventDeduplicator::new(Duration::from_secs(60));

        assert!(dedup.first_delivery("like-added", "e1").await.unwrap());
        assert!(!dedup.first_delivery("like-added", "e1").await.unwrap());
        assert!(dedup.first_delivery("post-viewed", "e1").await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_allows_reapplying() {
        let dedup = MemoryEventDeduplicator::new(Duration::from_secs(60));

        assert!(dedup.first_delivery("s", "e1").await.unwrap());
        dedup.forget("s", "e1").await.unwrap();
        assert!(dedup.first_delivery("s", "e1").await.unwrap());
    }

    #[tokio::test]
    async fn test_claims_expire() {
        let dedup = MemoryEventDeduplicator::new(Duration::ZERO);

        assert!(dedup.first_delivery("s", "e1").await.unwrap());
        assert!(dedup.first_delivery("s", "e1").await.unwrap());
    }
}
