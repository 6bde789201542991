//! Redis-based cache backend.

use super::{CacheBackend, ScanBatch, SCAN_START};
use async_trait::async_trait;
use deadpool_redis::Pool;
use feedline_core::{FeedError, FeedResult};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Redis-based cache backend.
#[derive(Clone)]
pub struct RedisCacheBackend {
    /// Redis connection pool.
    pool: Option<Arc<Pool>>,
}

impl RedisCacheBackend {
    /// Create a new Redis cache backend.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool: Some(pool) }
    }

    /// Create a no-op backend (for when Redis is disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> FeedResult<deadpool_redis::Connection> {
        match &self.pool {
            Some(pool) => pool
                .get()
                .await
                .map_err(|e| FeedError::Cache(format!("Failed to get Redis connection: {e}"))),
            None => Err(FeedError::Cache("Cache is disabled".to_string())),
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    async fn get_raw(&self, key: &str) -> FeedResult<Option<String>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to get key '{key}': {e}")))?;

        match &value {
            Some(_) => debug!("Cache hit for key '{}'", key),
            None => debug!("Cache miss for key '{}'", key),
        }

        Ok(value)
    }

    async fn get_many_raw(&self, keys: &[String]) -> FeedResult<Vec<Option<String>>> {
        if !self.is_enabled() || keys.is_empty() {
            return Ok(vec![None; keys.len()]);
        }

        let mut conn = self.get_conn().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to get {} keys: {e}", keys.len())))?;

        debug!(
            requested = keys.len(),
            hits = values.iter().filter(|v| v.is_some()).count(),
            "Batch cache lookup"
        );
        Ok(values)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> FeedResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut conn = self.get_conn().await?;
        let ttl_secs = ttl_secs(ttl);

        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to set key '{key}': {e}")))?;

        debug!("Cached key '{}' with TTL {}s", key, ttl_secs);
        Ok(())
    }

    async fn set_many_raw(&self, entries: &[(String, String)], ttl: Duration) -> FeedResult<()> {
        if !self.is_enabled() || entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_conn().await?;
        let ttl_secs = ttl_secs(ttl);

        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .ignore();
        }

        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to set {} keys: {e}", entries.len())))?;

        debug!("Cached {} keys with TTL {}s", entries.len(), ttl_secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> FeedResult<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let mut conn = self.get_conn().await?;
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to delete key '{key}': {e}")))?;

        debug!("Deleted key '{}': {}", key, deleted > 0);
        Ok(deleted > 0)
    }

    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> FeedResult<ScanBatch> {
        if !self.is_enabled() {
            return Ok(ScanBatch::default());
        }

        let mut conn = self.get_conn().await?;
        let (next, keys): (String, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut *conn)
            .await
            .map_err(|e| FeedError::Cache(format!("Failed to scan '{pattern}': {e}")))?;

        let entries = if keys.is_empty() {
            Vec::new()
        } else {
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut *conn)
                .await
                .map_err(|e| FeedError::Cache(format!("Failed to read scanned keys: {e}")))?;

            // keys can expire between SCAN and MGET
            keys.into_iter()
                .zip(values)
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect()
        };

        Ok(ScanBatch {
            entries,
            next_cursor: (next != SCAN_START).then_some(next),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_backend_is_a_noop() {
        let backend = RedisCacheBackend::disabled();
        assert!(!backend.is_enabled());

        backend.set_raw("k", "v", Duration::from_secs(1)).await.unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap(), None);
        assert_eq!(
            backend.get_many_raw(&["a".to_string(), "b".to_string()]).await.unwrap(),
            vec![None, None]
        );
        assert!(!backend.delete("k").await.unwrap());

        let batch = backend.scan("*", SCAN_START, 10).await.unwrap();
        assert!(batch.entries.is_empty());
        assert!(batch.next_cursor.is_none());
    }

    #[test]
    fn test_ttl_rounds_up_to_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(3600)), 3600);
    }
}
