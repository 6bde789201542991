//! Heating, warming and reclamation handlers.

use super::EventConsumers;
use crate::feed_assembler::FillReport;
use crate::reclaimer::ReclaimReport;
use feedline_core::{FeedError, FeedResult};
use feedline_events::messages::{
    CacheUserWarm, HeatFeedCache, HeatPostCacheBatch, ReclaimCache, StartCacheHeat,
};
use feedline_events::EventContext;
use tracing::info;

impl EventConsumers {
    pub async fn on_start_cache_heat(
        &self,
        _event: StartCacheHeat,
        ctx: &EventContext,
    ) -> FeedResult<usize> {
        info!(event_id = %ctx.event_id.as_str(), "Starting cache heat");
        self.heater.start_heat_feed_cache().await
    }

    pub async fn on_heat_post_cache_batch(
        &self,
        event: HeatPostCacheBatch,
        _ctx: &EventContext,
    ) -> FeedResult<usize> {
        self.heater.heat_posts_cache(&event.post_ids).await
    }

    pub async fn on_cache_user_warm(
        &self,
        event: CacheUserWarm,
        _ctx: &EventContext,
    ) -> FeedResult<usize> {
        self.heater.warm_users(&event.user_ids).await
    }

    /// Rebuilds the feeds of the listed users.
    ///
    /// Fails only when no feed at all could be rebuilt, so that a redelivery
    /// does not redo the feeds that succeeded.
    pub async fn on_heat_feed_cache(
        &self,
        event: HeatFeedCache,
        _ctx: &EventContext,
    ) -> FeedResult<FillReport> {
        let report = self.heater.heat_feeds(&event.user_ids).await;
        if report.filled == 0 && !report.failed.is_empty() {
            return Err(FeedError::store(format!(
                "no feed could be heated for {} users",
                report.failed.len()
            )));
        }
        Ok(report)
    }

    pub async fn on_reclaim_cache(
        &self,
        _event: ReclaimCache,
        ctx: &EventContext,
    ) -> FeedResult<ReclaimReport> {
        info!(event_id = %ctx.event_id.as_str(), "Starting cache reclamation");
        self.reclaimer.reclaim().await
    }
}
