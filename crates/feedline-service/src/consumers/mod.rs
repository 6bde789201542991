//! Event consumers.
//!
//! Thin adapters from bus events to the feed services. Handlers are
//! registered on two worker pools:
//!
//! | Pool          | Queues                  | Events                                              |
//! |---------------|-------------------------|-----------------------------------------------------|
//! | `fanout`      | `feed`, `post-activity` | post-published, heat-feed-cache, comment/like/view   |
//! | `maintenance` | `maintenance`           | start-cache-heat, heat-post-cache-batch, cache-user-warm, reclaim-cache |

mod activity;
mod maintenance;

use crate::feed_assembler::{FanoutReport, FeedAssembler};
use crate::heater::CacheHeater;
use crate::post_cache_service::PostCacheService;
use crate::reclaimer::CacheReclaimer;
use feedline_cache::EventDeduplicator;
use feedline_config::AppConfig;
use feedline_core::FeedResult;
use feedline_events::messages::{
    CacheUserWarm, CommentCreated, HeatFeedCache, HeatPostCacheBatch, LikeAdded, PostPublished,
    PostViewed, ReclaimCache, StartCacheHeat, FEED_QUEUE, MAINTENANCE_QUEUE, POST_ACTIVITY_QUEUE,
};
use feedline_events::{EventContext, EventError, WorkerPool, WorkerPoolConfig};
use feedline_repository::UserDirectory;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Worker pool settings for the fan-out consumers.
#[must_use]
pub fn fanout_pool_config(config: &AppConfig) -> WorkerPoolConfig {
    WorkerPoolConfig::for_queues(
        "fanout",
        config.pools.fanout_concurrency,
        vec![FEED_QUEUE.to_string(), POST_ACTIVITY_QUEUE.to_string()],
        &config.events.consumer,
    )
}

/// Worker pool settings for the maintenance consumers.
#[must_use]
pub fn maintenance_pool_config(config: &AppConfig) -> WorkerPoolConfig {
    WorkerPoolConfig::for_queues(
        "maintenance",
        config.pools.maintenance_concurrency,
        vec![MAINTENANCE_QUEUE.to_string()],
        &config.events.consumer,
    )
}

/// Handlers for every event feedline consumes.
#[derive(Clone)]
pub struct EventConsumers {
    assembler: FeedAssembler,
    post_service: PostCacheService,
    heater: CacheHeater,
    reclaimer: CacheReclaimer,
    directory: Arc<dyn UserDirectory>,
    dedup: Arc<dyn EventDeduplicator>,
}

/// Registers `$handler` for `$event` on `$pool`, cloning the consumers into
/// every delivery.
macro_rules! register_handler {
    ($pool:expr, $this:expr, $event:ty, $handler:ident) => {{
        let this = $this.clone();
        $pool.register::<$event, _, _>(move |event: $event, ctx: EventContext| {
            let this = this.clone();
            async move {
                this.$handler(event, &ctx).await?;
                Ok::<(), EventError>(())
            }
        });
    }};
}

impl EventConsumers {
    pub fn new(
        assembler: FeedAssembler,
        post_service: PostCacheService,
        heater: CacheHeater,
        reclaimer: CacheReclaimer,
        directory: Arc<dyn UserDirectory>,
        dedup: Arc<dyn EventDeduplicator>,
    ) -> Self {
        Self {
            assembler,
            post_service,
            heater,
            reclaimer,
            directory,
            dedup,
        }
    }

    /// Registers every handler on its pool.
    pub fn register(&self, fanout: &WorkerPool, maintenance: &WorkerPool) {
        register_handler!(fanout, self, PostPublished, on_post_published);
        register_handler!(fanout, self, HeatFeedCache, on_heat_feed_cache);
        register_handler!(fanout, self, CommentCreated, on_comment_created);
        register_handler!(fanout, self, LikeAdded, on_like_added);
        register_handler!(fanout, self, PostViewed, on_post_viewed);

        register_handler!(maintenance, self, StartCacheHeat, on_start_cache_heat);
        register_handler!(maintenance, self, HeatPostCacheBatch, on_heat_post_cache_batch);
        register_handler!(maintenance, self, CacheUserWarm, on_cache_user_warm);
        register_handler!(maintenance, self, ReclaimCache, on_reclaim_cache);
    }

    /// Fans a published post out to its followers.
    ///
    /// An event without follower ids is fanned out to the author's current
    /// followers. Failed followers are logged, not retried.
    #[instrument(skip_all, fields(post_id = %event.post.post_id, event_id = %ctx.event_id.as_str()))]
    pub async fn on_post_published(
        &self,
        event: PostPublished,
        ctx: &EventContext,
    ) -> FeedResult<FanoutReport> {
        let followers = if event.follower_ids.is_empty() {
            self.directory.follower_ids(event.post.author_id).await?
        } else {
            event.follower_ids
        };

        let report = self.assembler.add_post_to_feeds(event.post, followers).await;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, attempt = ctx.attempt, "Fan-out incomplete");
        }
        Ok(report)
    }
}
