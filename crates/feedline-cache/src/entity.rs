//! Typed, TTL-bound entity cache with per-key locking.

use crate::backend::{CacheBackend, SCAN_START};
use crate::keys::CacheKeys;
use crate::lock::{LockLease, LockOptions, Locker, LockerExt};
use crate::metrics::names;
use feedline_core::{decode_record, encode_record, CacheRecord, FeedError, FeedResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a batch lookup.
#[derive(Debug, Clone)]
pub struct BatchLookup<T: CacheRecord> {
    /// Records found, in the order they were requested.
    pub found: Vec<T>,
    /// Keys with no usable cached record, in the order they were requested.
    pub missing: Vec<T::Key>,
}

impl<T: CacheRecord> Default for BatchLookup<T> {
    fn default() -> Self {
        Self {
            found: Vec::new(),
            missing: Vec::new(),
        }
    }
}

/// Position of a paged scan over one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(String);

impl ScanCursor {
    /// Cursor that starts a new scan.
    #[must_use]
    pub fn start() -> Self {
        Self(SCAN_START.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a cache scan.
#[derive(Debug, Clone)]
pub struct ScanPage<T> {
    pub records: Vec<T>,
    /// Where to continue, `None` once the scan is complete.
    pub next: Option<ScanCursor>,
}

/// Outcome of a batched upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertReport<K> {
    /// Records merged and written.
    pub written: usize,
    /// Keys left untouched because their lock could not be acquired.
    pub skipped: Vec<K>,
}

impl<K> Default for UpsertReport<K> {
    fn default() -> Self {
        Self {
            written: 0,
            skipped: Vec::new(),
        }
    }
}

/// Cache of one record type.
///
/// Reads are lock-free. Every read-modify-write goes through
/// [`with_lock`](Self::with_lock) or one of the upsert methods, which hold
/// the per-key lock for the whole sequence.
pub struct EntityCache<T: CacheRecord> {
    backend: Arc<dyn CacheBackend>,
    locker: Arc<dyn Locker>,
    keys: CacheKeys,
    ttl: Duration,
    lock_options: LockOptions,
    _record: PhantomData<fn() -> T>,
}

impl<T: CacheRecord> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            locker: Arc::clone(&self.locker),
            keys: self.keys.clone(),
            ttl: self.ttl,
            lock_options: self.lock_options,
            _record: PhantomData,
        }
    }
}

impl<T: CacheRecord> EntityCache<T> {
    /// Creates a cache writing entries with the given TTL.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        locker: Arc<dyn Locker>,
        keys: CacheKeys,
        ttl: Duration,
        lock_options: LockOptions,
    ) -> Self {
        Self {
            backend,
            locker,
            keys,
            ttl,
            lock_options,
            _record: PhantomData,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn lock_options(&self) -> LockOptions {
        self.lock_options
    }

    fn entity_key(&self, key: T::Key) -> String {
        self.keys.entity(T::KIND, key)
    }

    fn lock_key(&self, key: T::Key) -> String {
        self.keys.lock(T::KIND, key)
    }

    fn decode(storage_key: &str, raw: &str) -> Option<T> {
        match decode_record::<T>(raw) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!(key = %storage_key, "Cached entry has another kind or schema version");
                metrics::counter!(names::CACHE_STALE_ENTRIES_TOTAL, "kind" => T::KIND).increment(1);
                None
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Undecodable cache entry");
                metrics::counter!(names::CACHE_STALE_ENTRIES_TOTAL, "kind" => T::KIND).increment(1);
                None
            }
        }
    }

    fn record_lookups(hits: usize, misses: usize) {
        if hits > 0 {
            metrics::counter!(names::CACHE_HITS_TOTAL, "kind" => T::KIND).increment(hits as u64);
        }
        if misses > 0 {
            metrics::counter!(names::CACHE_MISSES_TOTAL, "kind" => T::KIND).increment(misses as u64);
        }
    }

    /// Looks up one record. A miss is `Ok(None)`, never an error.
    pub async fn get(&self, key: T::Key) -> FeedResult<Option<T>> {
        let storage_key = self.entity_key(key);
        let record = self
            .backend
            .get_raw(&storage_key)
            .await?
            .and_then(|raw| Self::decode(&storage_key, &raw));

        let hit = usize::from(record.is_some());
        Self::record_lookups(hit, 1 - hit);
        Ok(record)
    }

    /// Looks up several records in one round trip.
    pub async fn get_many(&self, keys: &[T::Key]) -> FeedResult<BatchLookup<T>> {
        if keys.is_empty() {
            return Ok(BatchLookup::default());
        }

        let storage_keys: Vec<String> = keys.iter().map(|k| self.entity_key(*k)).collect();
        let raws = self.backend.get_many_raw(&storage_keys).await?;

        let mut lookup = BatchLookup::default();
        for ((key, storage_key), raw) in keys.iter().zip(&storage_keys).zip(raws) {
            match raw.and_then(|raw| Self::decode(storage_key, &raw)) {
                Some(record) => lookup.found.push(record),
                None => lookup.missing.push(*key),
            }
        }

        Self::record_lookups(lookup.found.len(), lookup.missing.len());
        Ok(lookup)
    }

    /// Writes a record with the cache's TTL.
    pub async fn put(&self, record: &T) -> FeedResult<()> {
        self.put_with_ttl(record, self.ttl).await
    }

    /// Writes a record with an explicit TTL.
    pub async fn put_with_ttl(&self, record: &T, ttl: Duration) -> FeedResult<()> {
        let raw = encode_record(record)?;
        self.backend
            .set_raw(&self.entity_key(record.key()), &raw, ttl)
            .await?;
        metrics::counter!(names::CACHE_WRITES_TOTAL, "kind" => T::KIND).increment(1);
        Ok(())
    }

    /// Writes several records in one pipelined call.
    pub async fn put_many(&self, records: &[T]) -> FeedResult<()> {
        let entries = records
            .iter()
            .map(|r| Ok((self.entity_key(r.key()), encode_record(r)?)))
            .collect::<FeedResult<Vec<_>>>()?;

        self.backend.set_many_raw(&entries, self.ttl).await?;
        metrics::counter!(names::CACHE_WRITES_TOTAL, "kind" => T::KIND).increment(entries.len() as u64);
        Ok(())
    }

    /// Deletes a record. Returns `true` if it was cached.
    pub async fn delete(&self, key: T::Key) -> FeedResult<bool> {
        self.backend.delete(&self.entity_key(key)).await
    }

    /// Reads one page of the records in this cache.
    ///
    /// Only `size` entries are loaded at a time. Entries that do not decode
    /// for this record type are left out of the page.
    pub async fn scan_page(&self, cursor: &ScanCursor, size: usize) -> FeedResult<ScanPage<T>> {
        let batch = self
            .backend
            .scan(&self.keys.pattern(T::KIND), cursor.as_str(), size)
            .await?;

        let records = batch
            .entries
            .iter()
            .filter_map(|(key, raw)| Self::decode(key, raw))
            .collect();

        Ok(ScanPage {
            records,
            next: batch.next_cursor.map(ScanCursor),
        })
    }

    /// Runs `f` under the lock of `key` with the cache's lock bounds.
    pub async fn with_lock<R, F, Fut>(&self, key: T::Key, f: F) -> FeedResult<R>
    where
        R: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FeedResult<R>> + Send,
    {
        self.with_lock_timeouts(key, self.lock_options.wait, self.lock_options.hold, f)
            .await
    }

    /// Runs `f` under the lock of `key` with explicit wait and hold bounds.
    pub async fn with_lock_timeouts<R, F, Fut>(
        &self,
        key: T::Key,
        wait: Duration,
        hold: Duration,
        f: F,
    ) -> FeedResult<R>
    where
        R: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FeedResult<R>> + Send,
    {
        self.locker
            .with_lock(&self.lock_key(key), LockOptions::new(wait, hold), f)
            .await
    }

    /// Writes `record`, first folding in any cached copy with `merge`.
    ///
    /// Returns the record as written.
    pub async fn upsert<M>(&self, record: T, merge: M) -> FeedResult<T>
    where
        M: FnOnce(&mut T, &T) + Send,
    {
        let key = record.key();
        self.with_lock(key, || async move {
            let mut record = record;
            if let Some(existing) = self.get(key).await? {
                merge(&mut record, &existing);
            }
            self.put(&record).await?;
            Ok(record)
        })
        .await
    }

    /// Batched [`upsert`](Self::upsert).
    ///
    /// Duplicate keys keep their first record. Locks are taken in key order;
    /// a key whose lock cannot be acquired is skipped and reported, the rest
    /// are read in one call, merged and written in one pipelined call.
    ///
    /// All leases of a batch share the hold window of the first one: later
    /// keys wait at most until that window closes and lapse with it. If the
    /// window closes before the write completes the whole batch fails with
    /// [`FeedError::LockFailure`] and nothing is reported as written.
    pub async fn upsert_many<M>(&self, records: Vec<T>, merge: M) -> FeedResult<UpsertReport<T::Key>>
    where
        M: Fn(&mut T, &T) + Send + Sync,
    {
        let mut by_key: BTreeMap<T::Key, T> = BTreeMap::new();
        for record in records {
            by_key.entry(record.key()).or_insert(record);
        }

        let mut report = UpsertReport::default();
        if by_key.is_empty() {
            return Ok(report);
        }
        metrics::histogram!(names::UPSERT_BATCH_SIZE, "kind" => T::KIND).record(by_key.len() as f64);

        let mut leases: Vec<LockLease> = Vec::with_capacity(by_key.len());
        let mut locked = Vec::with_capacity(by_key.len());
        let mut deadline: Option<Instant> = None;

        for (key, record) in by_key {
            let options = match deadline {
                None => self.lock_options,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        self.release_all(leases).await;
                        return Err(self.batch_overrun(locked.len()));
                    }
                    LockOptions::new(self.lock_options.wait.min(left), left)
                }
            };

            match self.locker.acquire(&self.lock_key(key), options).await {
                Ok(lease) => {
                    deadline.get_or_insert(lease.expires_at);
                    leases.push(lease);
                    locked.push(record);
                }
                Err(e) if e.is_lock_failure() => {
                    warn!(kind = T::KIND, key = %key, error = %e, "Skipping record in batch upsert");
                    metrics::counter!(names::LOCK_FAILURES_TOTAL, "stage" => "acquire").increment(1);
                    report.skipped.push(key);
                }
                Err(e) => {
                    self.release_all(leases).await;
                    return Err(e);
                }
            }
        }

        let Some(deadline) = deadline else {
            return Ok(report);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        let outcome = if left.is_zero() {
            None
        } else {
            tokio::time::timeout(left, self.merge_and_write(&mut locked, &merge))
                .await
                .ok()
        };
        self.release_all(leases).await;

        match outcome {
            Some(Ok(())) => {
                report.written = locked.len();
                Ok(report)
            }
            Some(Err(e)) => Err(e),
            None => Err(self.batch_overrun(locked.len())),
        }
    }

    fn batch_overrun(&self, locked: usize) -> FeedError {
        metrics::counter!(names::LOCK_FAILURES_TOTAL, "stage" => "hold").increment(1);
        FeedError::lock_failure(
            self.keys.pattern(T::KIND),
            format!(
                "batch of {locked} outlived its {}ms hold",
                self.lock_options.hold.as_millis()
            ),
        )
    }

    async fn merge_and_write<M>(&self, records: &mut [T], merge: &M) -> FeedResult<()>
    where
        M: Fn(&mut T, &T) + Send + Sync,
    {
        if records.is_empty() {
            return Ok(());
        }

        let storage_keys: Vec<String> = records.iter().map(|r| self.entity_key(r.key())).collect();
        let existing = self.backend.get_many_raw(&storage_keys).await?;

        for ((record, storage_key), raw) in records.iter_mut().zip(&storage_keys).zip(existing) {
            if let Some(cached) = raw.and_then(|raw| Self::decode(storage_key, &raw)) {
                merge(record, &cached);
            }
        }

        self.put_many(records).await
    }

    async fn release_all(&self, leases: Vec<LockLease>) {
        for lease in leases {
            let key = lease.key.clone();
            if let Err(e) = self.locker.release(lease).await {
                warn!(key = %key, error = %e, "Failed to release lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCacheBackend;
    use crate::lock::LocalLocker;
    use chrono::{TimeZone, Utc};
    use feedline_core::{CachedPost, CachedUser, PostId, UserId};

    struct Fixture {
        backend: Arc<MemoryCacheBackend>,
        locker: Arc<LocalLocker>,
        posts: EntityCache<CachedPost>,
        users: EntityCache<CachedUser>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryCacheBackend::new());
        let locker = Arc::new(LocalLocker::new());
        let options = LockOptions::new(Duration::from_millis(50), Duration::from_secs(1));
        let keys = CacheKeys::new("t");

        Fixture {
            posts: EntityCache::new(
                backend.clone(),
                locker.clone(),
                keys.clone(),
                Duration::from_secs(60),
                options,
            ),
            users: EntityCache::new(backend.clone(), locker.clone(), keys, Duration::from_secs(60), options),
            backend,
            locker,
        }
    }

    fn post(id: i64) -> CachedPost {
        CachedPost::new(
            PostId::new(id),
            UserId::new(1),
            format!("post {id}"),
            Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        )
    }

    fn user(id: i64) -> CachedUser {
        CachedUser {
            user_id: UserId::new(id),
            username: format!("user{id}"),
            active: true,
            profile_picture: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let f = fixture();
        assert!(f.posts.get(PostId::new(1)).await.unwrap().is_none());

        f.posts.put(&post(1)).await.unwrap();
        assert_eq!(f.posts.get(PostId::new(1)).await.unwrap(), Some(post(1)));

        assert!(f.posts.delete(PostId::new(1)).await.unwrap());
        assert!(f.posts.get(PostId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_old_schema_entry_is_a_miss() {
        let f = fixture();
        f.backend
            .set_raw(
                "t:user:5",
                r#"{"schema_version":0,"kind":"user","record":{"name":"old"}}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(f.users.get(UserId::new(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_reports_found_and_missing_in_order() {
        let f = fixture();
        f.users.put_many(&[user(1), user(3)]).await.unwrap();

        let lookup = f
            .users
            .get_many(&[UserId::new(3), UserId::new(2), UserId::new(1)])
            .await
            .unwrap();

        let found: Vec<i64> = lookup.found.iter().map(|u| u.user_id.0).collect();
        assert_eq!(found, vec![3, 1]);
        assert_eq!(lookup.missing, vec![UserId::new(2)]);
    }

    #[tokio::test]
    async fn test_scan_page_covers_only_its_kind() {
        let f = fixture();
        f.posts.put_many(&(1..=7).map(post).collect::<Vec<_>>()).await.unwrap();
        f.users.put(&user(1)).await.unwrap();

        let mut cursor = ScanCursor::start();
        let mut seen = Vec::new();
        loop {
            let page = f.posts.scan_page(&cursor, 3).await.unwrap();
            seen.extend(page.records.iter().map(|p| p.post_id.0));
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_upsert_merges_with_cached_copy() {
        let f = fixture();
        let mut cached = post(1);
        cached.likes_count = 10;
        f.posts.put(&cached).await.unwrap();

        let written = f.posts.upsert(post(1), CachedPost::absorb).await.unwrap();
        assert_eq!(written.likes_count, 10);
        assert_eq!(f.posts.get(PostId::new(1)).await.unwrap().unwrap().likes_count, 10);
    }

    #[tokio::test]
    async fn test_upsert_many_skips_locked_keys() {
        let f = fixture();
        let held = f
            .locker
            .acquire("t:lock:post:2", LockOptions::new(Duration::from_millis(10), Duration::from_secs(5)))
            .await
            .unwrap();

        let report = f
            .posts
            .upsert_many(vec![post(3), post(2), post(1), post(1)], CachedPost::absorb)
            .await
            .unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, vec![PostId::new(2)]);
        assert!(f.posts.get(PostId::new(2)).await.unwrap().is_none());
        assert!(f.posts.get(PostId::new(3)).await.unwrap().is_some());

        f.locker.release(held).await.unwrap();
        // the batch released its own locks
        assert!(f.posts.with_lock(PostId::new(1), || async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_many_fails_when_a_contended_key_outlasts_the_hold() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let locker = Arc::new(LocalLocker::new());
        let posts: EntityCache<CachedPost> = EntityCache::new(
            backend,
            locker.clone(),
            CacheKeys::new("t"),
            Duration::from_secs(60),
            LockOptions::new(Duration::from_millis(300), Duration::from_millis(50)),
        );
        let held = locker
            .acquire("t:lock:post:2", LockOptions::new(Duration::from_millis(10), Duration::from_secs(5)))
            .await
            .unwrap();

        let started = Instant::now();
        let err = posts
            .upsert_many(vec![post(1), post(2)], CachedPost::absorb)
            .await
            .unwrap_err();

        assert!(err.is_lock_failure());
        // waiting on post 2 stopped when the lease on post 1 ran out
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(posts.get(PostId::new(1)).await.unwrap().is_none());

        // post 1 was released, so another writer gets it at once
        let lease = locker
            .acquire("t:lock:post:1", LockOptions::new(Duration::from_millis(1), Duration::from_secs(1)))
            .await
            .unwrap();
        locker.release(lease).await.unwrap();
        locker.release(held).await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_expiry_and_uncontended_batch() {
        let f = fixture();
        let lease = f
            .locker
            .acquire("t:lock:post:9", LockOptions::new(Duration::from_millis(10), Duration::from_millis(40)))
            .await
            .unwrap();
        assert!(lease.expires_at <= Instant::now() + Duration::from_millis(40));
        f.locker.release(lease).await.unwrap();

        let report = f
            .posts
            .upsert_many(vec![post(1), post(2), post(3)], CachedPost::absorb)
            .await
            .unwrap();
        assert_eq!(report.written, 3);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_locked_increments_are_not_lost() {
        let f = fixture();
        f.posts.put(&post(1)).await.unwrap();
        let posts = f.posts.clone();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let posts = posts.clone();
            handles.push(tokio::spawn(async move {
                posts
                    .with_lock_timeouts(PostId::new(1), Duration::from_secs(5), Duration::from_secs(1), || async {
                        let mut current = posts.get(PostId::new(1)).await?.unwrap_or_else(|| post(1));
                        tokio::task::yield_now().await;
                        current.increment_likes();
                        posts.put(&current).await
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.posts.get(PostId::new(1)).await.unwrap().unwrap().likes_count, 20);
    }
}
