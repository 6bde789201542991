//! Feedline Events - at-least-once event delivery
//!
//! - Typed events serialized into [`EventEnvelope`]s
//! - Redis-backed bus with priority queues, delayed retries and a dead
//!   letter queue, plus an in-process bus for single-node runs
//! - Worker pools with bounded concurrency per queue group
//! - Cron scheduler with Redis leader election
//!
//! # Example
//!
//! ```rust,ignore
//! use feedline_events::{messages::LikeAdded, PublisherExt, WorkerPool};
//!
//! bus.publish(LikeAdded { post_id, user_id }).await?;
//!
//! pool.register::<LikeAdded, _, _>(move |event, ctx| {
//!     let posts = posts.clone();
//!     async move { Ok(posts.add_like(event.post_id).await?) }
//! });
//! ```

pub mod bus;
pub mod error;
pub mod event;
pub mod memory;
pub mod messages;
pub mod metrics;
pub mod redis;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use bus::{EventBus, EventPublisher, FailureDisposition, PublisherExt};
pub use error::{EventError, EventResult};
pub use event::{Event, EventContext, EventEnvelope, EventId, OutgoingEvent, Priority};
pub use memory::MemoryEventBus;
pub use crate::metrics::register_metrics;
pub use crate::redis::{EventKeys, RedisEventBus};
pub use retry::Backoff;
pub use scheduler::{Coordination, ScheduledTrigger, ScheduledTriggerInfo, Scheduler, SchedulerStats};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};
