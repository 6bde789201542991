//! # Feedline Cache
//!
//! The hot cache of feedline: a raw storage backend (Redis or in-process),
//! typed [`EntityCache`] instances for posts, users and feeds, per-key
//! [`Locker`]s and event id claims.

pub mod backend;
mod dedup;
mod entity;
pub mod keys;
pub mod lock;
pub mod metrics;
mod pool;

pub use backend::{CacheBackend, MemoryCacheBackend, RedisCacheBackend, ScanBatch};
pub use dedup::{EventDeduplicator, MemoryEventDeduplicator, RedisEventDeduplicator};
pub use entity::{BatchLookup, EntityCache, ScanCursor, ScanPage, UpsertReport};
pub use keys::CacheKeys;
pub use lock::{LocalLocker, LockLease, LockOptions, Locker, LockerExt, RedisLocker};
pub use pool::create_pool;
