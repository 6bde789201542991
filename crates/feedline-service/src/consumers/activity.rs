//! Counter and comment updates on cached posts.
//!
//! Deliveries are at least once. Each event id is claimed before the post
//! is touched so a redelivery does not count twice; a failed update gives
//! the claim back so the retry applies it.

use super::EventConsumers;
use crate::metrics::names;
use feedline_core::{CachedPost, FeedResult};
use feedline_events::messages::{CommentCreated, LikeAdded, PostViewed};
use feedline_events::{Event, EventContext};
use std::future::Future;
use tracing::{debug, error};

impl EventConsumers {
    /// Runs `update` unless this delivery was already applied.
    ///
    /// Returns `None` for a duplicate delivery.
    async fn apply_once<F>(
        &self,
        scope: &'static str,
        ctx: &EventContext,
        update: F,
    ) -> FeedResult<Option<CachedPost>>
    where
        F: Future<Output = FeedResult<CachedPost>> + Send,
    {
        let event_id = ctx.event_id.as_str();
        if !self.dedup.first_delivery(scope, event_id).await? {
            metrics::counter!(names::DUPLICATE_EVENTS_TOTAL, "event" => scope).increment(1);
            debug!(event = scope, event_id, "Skipping redelivered event");
            return Ok(None);
        }

        match update.await {
            Ok(post) => Ok(Some(post)),
            Err(e) => {
                if let Err(release) = self.dedup.forget(scope, event_id).await {
                    error!(event = scope, event_id, error = %release, "Failed to release event claim");
                }
                Err(e)
            }
        }
    }

    pub async fn on_comment_created(
        &self,
        event: CommentCreated,
        ctx: &EventContext,
    ) -> FeedResult<Option<CachedPost>> {
        self.apply_once(
            CommentCreated::NAME,
            ctx,
            self.post_service.add_comment(event.comment),
        )
        .await
    }

    pub async fn on_like_added(
        &self,
        event: LikeAdded,
        ctx: &EventContext,
    ) -> FeedResult<Option<CachedPost>> {
        self.apply_once(LikeAdded::NAME, ctx, self.post_service.add_like(event.post_id))
            .await
    }

    pub async fn on_post_viewed(
        &self,
        event: PostViewed,
        ctx: &EventContext,
    ) -> FeedResult<Option<CachedPost>> {
        self.apply_once(PostViewed::NAME, ctx, self.post_service.add_view(event.post_id))
            .await
    }
}
