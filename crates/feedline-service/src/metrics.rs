//! Prometheus metrics for feed assembly and cache maintenance.

use metrics::{describe_counter, describe_histogram};

/// Metric names for the feed services.
pub mod names {
    /// Feed pages served, labelled by the path that produced them.
    pub const FEED_PAGES_TOTAL: &str = "feedline_feed_pages_total";
    /// Time to assemble one feed page.
    pub const FEED_PAGE_DURATION_SECONDS: &str = "feedline_feed_page_duration_seconds";
    /// Feeds rebuilt from the store.
    pub const FEED_FILLS_TOTAL: &str = "feedline_feed_fills_total";
    /// Per-follower fan-out results, labelled by outcome.
    pub const FANOUT_DELIVERIES_TOTAL: &str = "feedline_fanout_deliveries_total";
    /// Posts loaded from the store to fill cache misses.
    pub const POST_BACKFILLS_TOTAL: &str = "feedline_post_backfills_total";
    /// Posts written by heating.
    pub const HEATED_POSTS_TOTAL: &str = "feedline_heated_posts_total";
    /// Entries evicted by reclamation, labelled by kind.
    pub const RECLAIMED_ENTRIES_TOTAL: &str = "feedline_reclaimed_entries_total";
    /// Redelivered events skipped by consumers.
    pub const DUPLICATE_EVENTS_TOTAL: &str = "feedline_duplicate_events_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::FEED_PAGES_TOTAL, "Total number of feed pages served");
    describe_histogram!(
        names::FEED_PAGE_DURATION_SECONDS,
        "Feed page assembly duration in seconds"
    );
    describe_counter!(names::FEED_FILLS_TOTAL, "Total number of feeds rebuilt from the store");
    describe_counter!(
        names::FANOUT_DELIVERIES_TOTAL,
        "Total number of per-follower fan-out results"
    );
    describe_counter!(
        names::POST_BACKFILLS_TOTAL,
        "Total number of posts loaded from the store on cache miss"
    );
    describe_counter!(names::HEATED_POSTS_TOTAL, "Total number of posts written by heating");
    describe_counter!(
        names::RECLAIMED_ENTRIES_TOTAL,
        "Total number of cache entries evicted by reclamation"
    );
    describe_counter!(
        names::DUPLICATE_EVENTS_TOTAL,
        "Total number of redelivered events skipped"
    );
}
