//! The three entity caches the feed services work against.

use feedline_cache::{
    CacheBackend, CacheKeys, EntityCache, LocalLocker, LockOptions, Locker, MemoryCacheBackend,
};
use feedline_config::CacheConfig;
use feedline_core::{CachedPost, CachedUser, FeedEntrySet};
use std::sync::Arc;

/// Post, user and feed caches sharing one backend and one locker.
#[derive(Clone)]
pub struct FeedCaches {
    pub posts: EntityCache<CachedPost>,
    pub users: EntityCache<CachedUser>,
    pub feeds: EntityCache<FeedEntrySet>,
}

impl FeedCaches {
    /// Builds the caches with the TTLs and lock bounds from `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, locker: Arc<dyn Locker>, config: &CacheConfig) -> Self {
        let keys = CacheKeys::new(&config.key_prefix);
        let lock_options = LockOptions::new(config.lock_wait(), config.lock_hold());

        Self {
            posts: EntityCache::new(
                Arc::clone(&backend),
                Arc::clone(&locker),
                keys.clone(),
                config.posts_ttl(),
                lock_options,
            ),
            users: EntityCache::new(
                Arc::clone(&backend),
                Arc::clone(&locker),
                keys.clone(),
                config.users_ttl(),
                lock_options,
            ),
            feeds: EntityCache::new(backend, locker, keys, config.feeds_ttl(), lock_options),
        }
    }

    /// Caches kept in process memory with in-process locking.
    #[must_use]
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(
            Arc::new(MemoryCacheBackend::new()),
            Arc::new(LocalLocker::new()),
            config,
        )
    }
}
