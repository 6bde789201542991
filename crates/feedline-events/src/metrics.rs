//! Prometheus metrics for the event bus.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Metric names for the event bus.
pub mod names {
    /// Total events published.
    pub const EVENTS_PUBLISHED_TOTAL: &str = "feedline_events_published_total";
    /// Total events handled successfully.
    pub const EVENTS_COMPLETED_TOTAL: &str = "feedline_events_completed_total";
    /// Total failed deliveries.
    pub const EVENTS_FAILED_TOTAL: &str = "feedline_events_failed_total";
    /// Total events scheduled for redelivery.
    pub const EVENTS_RETRIED_TOTAL: &str = "feedline_events_retried_total";
    /// Total events sent to the dead letter queue.
    pub const EVENTS_DEAD_LETTERED_TOTAL: &str = "feedline_events_dead_lettered_total";
    /// Event handling duration in seconds.
    pub const EVENT_DURATION_SECONDS: &str = "feedline_event_duration_seconds";
    /// Whether this instance leads the scheduler (0 or 1).
    pub const SCHEDULER_IS_LEADER: &str = "feedline_scheduler_is_leader";
    /// Scheduled triggers published.
    pub const SCHEDULER_TRIGGERS_TOTAL: &str = "feedline_scheduler_triggers_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::EVENTS_PUBLISHED_TOTAL, "Total number of events published");
    describe_counter!(
        names::EVENTS_COMPLETED_TOTAL,
        "Total number of events handled successfully"
    );
    describe_counter!(names::EVENTS_FAILED_TOTAL, "Total number of failed deliveries");
    describe_counter!(
        names::EVENTS_RETRIED_TOTAL,
        "Total number of events scheduled for redelivery"
    );
    describe_counter!(
        names::EVENTS_DEAD_LETTERED_TOTAL,
        "Total number of events sent to the dead letter queue"
    );
    describe_histogram!(
        names::EVENT_DURATION_SECONDS,
        "Event handling duration in seconds"
    );
    describe_gauge!(
        names::SCHEDULER_IS_LEADER,
        "Whether this instance leads the scheduler"
    );
    describe_counter!(
        names::SCHEDULER_TRIGGERS_TOTAL,
        "Total number of scheduled triggers published"
    );
}
