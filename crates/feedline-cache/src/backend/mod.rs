//! Raw key/value storage behind the entity caches.

mod memory_backend;
mod redis_backend;

pub use memory_backend::MemoryCacheBackend;
pub use redis_backend::RedisCacheBackend;

use async_trait::async_trait;
use feedline_core::FeedResult;
use std::time::Duration;

/// Cursor value that starts a fresh scan.
pub const SCAN_START: &str = "0";

/// One step of a keyspace scan.
#[derive(Debug, Clone, Default)]
pub struct ScanBatch {
    /// Matching keys with their current values.
    pub entries: Vec<(String, String)>,
    /// Cursor for the next step, `None` once the scan is complete.
    pub next_cursor: Option<String>,
}

/// Storage interface for cached values.
///
/// Values are opaque strings; typing and schema checks happen in
/// [`EntityCache`](crate::EntityCache). Implementations must be usable as
/// trait objects.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a raw value.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get_raw(&self, key: &str) -> FeedResult<Option<String>>;

    /// Get several raw values in one round trip, in the order of `keys`.
    async fn get_many_raw(&self, keys: &[String]) -> FeedResult<Vec<Option<String>>>;

    /// Set a raw value with a TTL.
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> FeedResult<()>;

    /// Set several raw values with the same TTL in one pipelined call.
    async fn set_many_raw(&self, entries: &[(String, String)], ttl: Duration) -> FeedResult<()>;

    /// Delete a value.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> FeedResult<bool>;

    /// Visits part of the keyspace matching `pattern`, starting at `cursor`.
    ///
    /// `count` is a hint; a step may return fewer or more entries. A full
    /// scan may report the same key more than once.
    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> FeedResult<ScanBatch>;

    /// Check if the backend is connected to a store.
    fn is_enabled(&self) -> bool;
}
