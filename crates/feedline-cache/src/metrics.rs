//! Metrics for cache and lock behaviour.

use metrics::{describe_counter, describe_histogram};

/// Metric names for the cache layer.
pub mod names {
    /// Lookups answered from the cache.
    pub const CACHE_HITS_TOTAL: &str = "feedline_cache_hits_total";
    /// Lookups that fell through to the source of truth.
    pub const CACHE_MISSES_TOTAL: &str = "feedline_cache_misses_total";
    /// Stored entries that could not be decoded for the reader's schema.
    pub const CACHE_STALE_ENTRIES_TOTAL: &str = "feedline_cache_stale_entries_total";
    /// Entries written.
    pub const CACHE_WRITES_TOTAL: &str = "feedline_cache_writes_total";
    /// Locks not acquired in time or held too long.
    pub const LOCK_FAILURES_TOTAL: &str = "feedline_lock_failures_total";
    /// Size of batched upserts.
    pub const UPSERT_BATCH_SIZE: &str = "feedline_cache_upsert_batch_size";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Number of cache lookups answered from the cache");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Number of cache lookups that missed");
    describe_counter!(
        names::CACHE_STALE_ENTRIES_TOTAL,
        "Number of cached entries skipped because of a kind or schema mismatch"
    );
    describe_counter!(names::CACHE_WRITES_TOTAL, "Number of cache entries written");
    describe_counter!(
        names::LOCK_FAILURES_TOTAL,
        "Number of per-key locks not acquired in time or held too long"
    );
    describe_histogram!(names::UPSERT_BATCH_SIZE, "Number of records per batched upsert");
}
