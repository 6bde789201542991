//! Redis-backed event bus implementation.

mod bus;

pub use bus::RedisEventBus;

/// Redis key builder for the event bus.
#[derive(Debug, Clone)]
pub struct EventKeys {
    prefix: String,
}

impl EventKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Deliverable events of a queue (sorted set by priority + time).
    #[must_use]
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue_name)
    }

    /// Events waiting for their retry time (sorted set by due time).
    #[must_use]
    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    /// Events being handled (hash: event id -> envelope as dequeued).
    #[must_use]
    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    /// When each active event was dequeued (sorted set by dequeue time).
    #[must_use]
    pub fn active_since(&self) -> String {
        format!("{}:active:since", self.prefix)
    }

    /// Dead letter queue (sorted set by failure time).
    #[must_use]
    pub fn dlq(&self) -> String {
        format!("{}:dlq", self.prefix)
    }

    /// Scheduler leader lock.
    #[must_use]
    pub fn scheduler_lock(&self) -> String {
        format!("{}:scheduler:lock", self.prefix)
    }

    /// Last time a scheduled trigger was published.
    #[must_use]
    pub fn last_run(&self, trigger: &str) -> String {
        format!("{}:scheduled:last_run:{}", self.prefix, trigger)
    }
}

impl Default for EventKeys {
    fn default() -> Self {
        Self::new("feedline:events")
    }
}
