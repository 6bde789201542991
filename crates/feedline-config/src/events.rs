//! Event bus configuration.
//!
//! Concurrency of the consumer pools lives in the `pools` section; this
//! section covers delivery behaviour shared by every pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Prefix for queue, delayed, dead-letter and scheduler keys.
    pub key_prefix: String,
    pub consumer: ConsumerConfig,
    pub redelivery: RedeliveryConfig,
    pub dead_letter: DeadLetterConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            key_prefix: "feedline:events".to_string(),
            consumer: ConsumerConfig::default(),
            redelivery: RedeliveryConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// How a consumer pool polls and how long it gives a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Upper bound for one handler run. A fan-out to a large audience is
    /// the slowest handler.
    pub handler_timeout_secs: u64,
    /// Sleep between polls while every queue is empty.
    pub idle_poll_ms: u64,
    /// How long a stopping pool waits for in-flight handlers.
    pub drain_timeout_secs: u64,
    /// A delivery unacknowledged for this long is taken as abandoned by a
    /// dead consumer and redelivered. Must exceed the handler timeout.
    pub stale_after_secs: u64,
    /// How often a pool looks for abandoned deliveries.
    pub recover_interval_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: 120,
            idle_poll_ms: 100,
            drain_timeout_secs: 30,
            stale_after_secs: 600,
            recover_interval_secs: 60,
        }
    }
}

impl ConsumerConfig {
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    #[must_use]
    pub const fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    #[must_use]
    pub const fn recover_interval(&self) -> Duration {
        Duration::from_secs(self.recover_interval_secs)
    }
}

/// Backoff before a failed event becomes visible again.
///
/// The number of attempts is a property of each event type, not of this
/// section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth of the delay per failed attempt; `1.0` gives a fixed delay.
    pub factor: f64,
    /// Fraction of the delay randomised to spread redeliveries.
    pub jitter: f64,
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RedeliveryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// When disabled, events that exhausted their attempts are dropped.
    pub enabled: bool,
    /// Newest dead letters kept; older ones are trimmed.
    pub capacity: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
        }
    }
}

/// Cron trigger scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often due triggers are checked.
    pub tick_secs: u64,
    /// Lifetime of the leader key; renewed at a third of it.
    pub leader_lease_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 10,
            leader_lease_secs: 30,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    #[must_use]
    pub const fn leader_lease(&self) -> Duration {
        Duration::from_secs(self.leader_lease_secs)
    }
}
