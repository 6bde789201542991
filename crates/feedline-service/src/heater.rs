//! Cache heating.
//!
//! Heating runs as a chain of queued units so that every instance of the
//! maintenance pool can share the work:
//!
//! ```text
//! start-cache-heat ─► heat-post-cache-batch ─► cache-user-warm ─► heat-feed-cache
//!   (page ids)           (write posts)           (write users)       (fill feeds)
//! ```

use crate::feed_assembler::{FeedAssembler, FillReport};
use crate::metrics::names;
use crate::post_cache_service::PostCacheService;
use feedline_cache::EntityCache;
use feedline_config::HeaterConfig;
use chrono::{Duration, Utc};
use feedline_core::{CachedUser, FeedResult, KeysetRequest, PostId, UserId};
use feedline_events::messages::{CacheUserWarm, HeatFeedCache, HeatPostCacheBatch};
use feedline_events::{EventPublisher, PublisherExt};
use feedline_repository::{PostStore, UserDirectory};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Pre-populates the post and user caches and re-warms feeds.
#[derive(Clone)]
pub struct CacheHeater {
    directory: Arc<dyn UserDirectory>,
    post_store: Arc<dyn PostStore>,
    post_service: PostCacheService,
    users: EntityCache<CachedUser>,
    assembler: FeedAssembler,
    publisher: Arc<dyn EventPublisher>,
    config: HeaterConfig,
}

impl CacheHeater {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        post_store: Arc<dyn PostStore>,
        post_service: PostCacheService,
        users: EntityCache<CachedUser>,
        assembler: FeedAssembler,
        publisher: Arc<dyn EventPublisher>,
        config: HeaterConfig,
    ) -> Self {
        Self {
            directory,
            post_store,
            post_service,
            users,
            assembler,
            publisher,
            config,
        }
    }

    /// Splits the recently published posts into heating units.
    ///
    /// Returns the number of `heat-post-cache-batch` events published.
    #[instrument(skip(self))]
    pub async fn start_heat_feed_cache(&self) -> FeedResult<usize> {
        if let Err(e) = self.directory.refresh_identity_cache().await {
            warn!(error = %e, "Identity cache refresh failed, heating posts anyway");
        }

        let days = self.config.published_days_ago;
        // one window for the whole walk
        let since = Utc::now() - Duration::days(i64::from(days));
        let mut request = KeysetRequest::first(self.config.event_batch_size);
        let mut batches = 0;

        loop {
            let page = self.post_store.recent_post_ids(since, request).await?;
            if !page.has_content() {
                break;
            }

            let next = page.next;
            self.publisher
                .publish(HeatPostCacheBatch {
                    post_ids: page.content,
                })
                .await?;
            batches += 1;

            match next {
                Some(following) => request = following,
                None => break,
            }
        }

        info!(batches, days, "Published post heating batches");
        Ok(batches)
    }

    /// Writes one batch of posts into the post cache and asks for their
    /// authors to be warmed. Returns the number of posts written.
    #[instrument(skip(self, post_ids), fields(posts = post_ids.len()))]
    pub async fn heat_posts_cache(&self, post_ids: &[PostId]) -> FeedResult<usize> {
        if post_ids.is_empty() {
            return Ok(0);
        }

        let posts = self.post_store.by_ids(post_ids).await?;
        let posts = self.post_service.with_latest_comments(posts).await?;

        let mut author_ids: Vec<UserId> = posts.iter().map(|p| p.author_id).collect();
        author_ids.sort_unstable();
        author_ids.dedup();

        let report = self.post_service.upsert_many(posts).await?;
        metrics::counter!(names::HEATED_POSTS_TOTAL).increment(report.written as u64);

        if !author_ids.is_empty() {
            self.publisher
                .publish(CacheUserWarm {
                    user_ids: author_ids,
                })
                .await?;
        }

        debug!(written = report.written, skipped = report.skipped.len(), "Heated posts");
        Ok(report.written)
    }

    /// Writes identity snapshots into the user cache and asks for the feeds
    /// of the active users to be rebuilt. Returns the number of snapshots
    /// written.
    #[instrument(skip(self, user_ids), fields(users = user_ids.len()))]
    pub async fn warm_users(&self, user_ids: &[UserId]) -> FeedResult<usize> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let snapshots = self.directory.identity_snapshots(user_ids).await?;
        if snapshots.is_empty() {
            return Ok(0);
        }
        self.users.put_many(&snapshots).await?;

        let active: Vec<UserId> = snapshots
            .iter()
            .filter(|u| u.active)
            .map(|u| u.user_id)
            .collect();
        if !active.is_empty() {
            self.publisher.publish(HeatFeedCache { user_ids: active }).await?;
        }

        Ok(snapshots.len())
    }

    /// Rebuilds the feeds of `user_ids` at full capacity.
    pub async fn heat_feeds(&self, user_ids: &[UserId]) -> FillReport {
        let report = self.assembler.fill_feeds(user_ids).await;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some feeds could not be heated");
        }
        report
    }
}
