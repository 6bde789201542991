//! # Feedline Service
//!
//! The feed pipeline on top of the caches and the sources of truth:
//! cache-aside post reads and counters, feed assembly with fan-out on
//! write and hybrid paging, cache heating and reclamation, and the event
//! consumers that drive them.

pub mod caches;
pub mod consumers;
pub mod feed_assembler;
pub mod heater;
pub mod metrics;
pub mod post_cache_service;
pub mod reclaimer;
pub mod task_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use caches::FeedCaches;
pub use consumers::{fanout_pool_config, maintenance_pool_config, EventConsumers};
pub use feed_assembler::{FanoutHandle, FanoutReport, FeedAssembler, FeedSource, FillReport};
pub use heater::CacheHeater;
pub use crate::metrics::register_metrics;
pub use post_cache_service::PostCacheService;
pub use reclaimer::{CacheReclaimer, ReclaimReport, SweepReport};
pub use task_pool::TaskPool;
