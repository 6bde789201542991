//! Cache-aside access to posts and lock-guarded counter updates.

use crate::caches::FeedCaches;
use crate::metrics::names;
use feedline_cache::{EntityCache, UpsertReport};
use feedline_core::{CachedComment, CachedPost, FeedError, FeedResult, PostId};
use feedline_repository::{CommentStore, PostStore};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Reads posts through the post cache and applies counter updates to
/// cached copies.
#[derive(Clone)]
pub struct PostCacheService {
    posts: EntityCache<CachedPost>,
    post_store: Arc<dyn PostStore>,
    comment_store: Arc<dyn CommentStore>,
    comments_in_post: usize,
}

impl PostCacheService {
    pub fn new(
        caches: &FeedCaches,
        post_store: Arc<dyn PostStore>,
        comment_store: Arc<dyn CommentStore>,
        comments_in_post: usize,
    ) -> Self {
        Self {
            posts: caches.posts.clone(),
            post_store,
            comment_store,
            comments_in_post,
        }
    }

    /// Attaches the latest comments to each post, one store call per post.
    pub async fn with_latest_comments(&self, posts: Vec<CachedPost>) -> FeedResult<Vec<CachedPost>> {
        let limit = self.comments_in_post;
        if limit == 0 {
            return Ok(posts);
        }

        try_join_all(posts.into_iter().map(|mut post| async move {
            let comments = self.comment_store.latest_by_post(post.post_id, limit).await?;
            post.set_comments(comments, limit);
            Ok::<_, FeedError>(post)
        }))
        .await
    }

    /// Loads one post from the store with its latest comments, without
    /// touching the cache.
    async fn load(&self, post_id: PostId) -> FeedResult<CachedPost> {
        let post = self
            .post_store
            .by_ids(&[post_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::validation(format!("Post {post_id} does not exist")))?;

        metrics::counter!(names::POST_BACKFILLS_TOTAL).increment(1);
        let mut enriched = self.with_latest_comments(vec![post]).await?;
        enriched
            .pop()
            .ok_or_else(|| FeedError::internal("comment enrichment dropped a post"))
    }

    /// Returns a post with its latest comments, filling the cache on a miss.
    #[instrument(skip(self))]
    pub async fn get_post_with_comments(&self, post_id: PostId) -> FeedResult<CachedPost> {
        if let Some(post) = self.posts.get(post_id).await? {
            return Ok(post);
        }

        debug!(post_id = %post_id, "Post cache miss");
        let post = self.load(post_id).await?;
        self.posts.put(&post).await?;
        Ok(post)
    }

    /// Resolves ids to posts, keeping the requested order.
    ///
    /// Misses are loaded from the store in one call, enriched and written
    /// back. Ids that exist nowhere are left out.
    pub async fn resolve(&self, ids: &[PostId]) -> FeedResult<Vec<CachedPost>> {
        let lookup = self.posts.get_many(ids).await?;
        let mut by_id: HashMap<PostId, CachedPost> =
            lookup.found.into_iter().map(|p| (p.post_id, p)).collect();

        if !lookup.missing.is_empty() {
            let loaded = self.post_store.by_ids(&lookup.missing).await?;
            metrics::counter!(names::POST_BACKFILLS_TOTAL).increment(loaded.len() as u64);
            if loaded.len() < lookup.missing.len() {
                warn!(
                    requested = lookup.missing.len(),
                    loaded = loaded.len(),
                    "Some posts were not found in the store"
                );
            }

            let loaded = self.with_latest_comments(loaded).await?;
            if !loaded.is_empty() {
                self.upsert_many(loaded.clone()).await?;
            }
            by_id.extend(loaded.into_iter().map(|p| (p.post_id, p)));
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Applies `change` to the cached post under its lock.
    ///
    /// On a miss the post is loaded from the store instead; the store copy
    /// already reflects the change, so `change` is not applied to it.
    async fn mutate<F>(&self, post_id: PostId, change: F) -> FeedResult<CachedPost>
    where
        F: FnOnce(&mut CachedPost) + Send,
    {
        self.posts
            .with_lock(post_id, || async move {
                let post = match self.posts.get(post_id).await? {
                    Some(mut post) => {
                        change(&mut post);
                        post
                    }
                    None => self.load(post_id).await?,
                };
                self.posts.put(&post).await?;
                Ok(post)
            })
            .await
    }

    /// Counts a like on a post.
    #[instrument(skip(self))]
    pub async fn add_like(&self, post_id: PostId) -> FeedResult<CachedPost> {
        self.mutate(post_id, CachedPost::increment_likes).await
    }

    /// Counts a view of a post.
    #[instrument(skip(self))]
    pub async fn add_view(&self, post_id: PostId) -> FeedResult<CachedPost> {
        self.mutate(post_id, CachedPost::increment_views).await
    }

    /// Records a new comment on its post.
    #[instrument(skip(self, comment), fields(post_id = %comment.post_id, comment_id = %comment.comment_id))]
    pub async fn add_comment(&self, comment: CachedComment) -> FeedResult<CachedPost> {
        let limit = self.comments_in_post;
        self.mutate(comment.post_id, move |post| post.add_comment(comment, limit))
            .await
    }

    /// Writes a post, keeping the larger counters of any cached copy.
    pub async fn upsert(&self, post: CachedPost) -> FeedResult<CachedPost> {
        self.posts.upsert(post, CachedPost::absorb).await
    }

    /// Batched [`upsert`](Self::upsert); posts whose lock is busy are skipped.
    pub async fn upsert_many(&self, posts: Vec<CachedPost>) -> FeedResult<UpsertReport<PostId>> {
        let report = self.posts.upsert_many(posts, CachedPost::absorb).await?;
        if !report.skipped.is_empty() {
            warn!(skipped = ?report.skipped, "Posts left out of batch upsert");
        }
        Ok(report)
    }

    /// Drops a post from the cache.
    pub async fn evict(&self, post_id: PostId) -> FeedResult<bool> {
        self.posts.delete(post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{comment, post, Harness};

    #[tokio::test]
    async fn test_get_post_fills_cache_once() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.comments.insert(comment(100, 1, 11));

        let first = h.post_service.get_post_with_comments(PostId::new(1)).await.unwrap();
        assert_eq!(first.comments.len(), 1);
        assert_eq!(h.posts.by_ids_calls(), 1);

        h.post_service.get_post_with_comments(PostId::new(1)).await.unwrap();
        assert_eq!(h.posts.by_ids_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_post_is_validation_failure() {
        let h = Harness::new();
        let err = h
            .post_service
            .get_post_with_comments(PostId::new(404))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_evicted_post_is_read_from_store_exactly_once() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.post_service.resolve(&[PostId::new(1)]).await.unwrap();
        h.post_service.evict(PostId::new(1)).await.unwrap();
        h.posts.reset_calls();

        let resolved = h.post_service.resolve(&[PostId::new(1)]).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(h.posts.by_ids_calls(), 1);

        h.post_service.resolve(&[PostId::new(1)]).await.unwrap();
        assert_eq!(h.posts.by_ids_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_keeps_order_and_skips_unknown() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.posts.insert(post(2, 1, 20));
        h.post_service.get_post_with_comments(PostId::new(2)).await.unwrap();

        let resolved = h
            .post_service
            .resolve(&[PostId::new(2), PostId::new(99), PostId::new(1)])
            .await
            .unwrap();
        let ids: Vec<i64> = resolved.iter().map(|p| p.post_id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_counters_apply_to_cached_copy() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.post_service.get_post_with_comments(PostId::new(1)).await.unwrap();

        h.post_service.add_like(PostId::new(1)).await.unwrap();
        h.post_service.add_like(PostId::new(1)).await.unwrap();
        let viewed = h.post_service.add_view(PostId::new(1)).await.unwrap();

        assert_eq!(viewed.likes_count, 2);
        assert_eq!(viewed.views_count, 1);
    }

    #[tokio::test]
    async fn test_counter_on_miss_uses_store_copy() {
        let h = Harness::new();
        let mut stored = post(1, 1, 10);
        stored.likes_count = 4;
        h.posts.insert(stored);

        let liked = h.post_service.add_like(PostId::new(1)).await.unwrap();
        assert_eq!(liked.likes_count, 4);
        let cached = h.caches.posts.get(PostId::new(1)).await.unwrap().unwrap();
        assert_eq!(cached.likes_count, 4);
    }

    #[tokio::test]
    async fn test_add_comment_caps_shown_comments() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.post_service.get_post_with_comments(PostId::new(1)).await.unwrap();

        for id in 1..=5 {
            h.post_service.add_comment(comment(id, 1, 10 + id)).await.unwrap();
        }

        let cached = h.caches.posts.get(PostId::new(1)).await.unwrap().unwrap();
        assert_eq!(cached.comments_count, 5);
        assert_eq!(cached.comments.len(), h.config.feed.comments_in_post);
        assert_eq!(cached.comments[0].comment_id.0, 5);
    }

    #[tokio::test]
    async fn test_concurrent_likes_are_not_lost() {
        let h = Harness::new();
        h.posts.insert(post(1, 1, 10));
        h.post_service.get_post_with_comments(PostId::new(1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = h.post_service.clone();
            handles.push(tokio::spawn(async move { service.add_like(PostId::new(1)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let cached = h.caches.posts.get(PostId::new(1)).await.unwrap().unwrap();
        assert_eq!(cached.likes_count, 20);
    }

    #[tokio::test]
    async fn test_upsert_never_lowers_counters() {
        let h = Harness::new();
        let mut cached = post(1, 1, 10);
        cached.likes_count = 9;
        h.caches.posts.put(&cached).await.unwrap();

        let mut stale = post(1, 1, 10);
        stale.likes_count = 3;
        let written = h.post_service.upsert(stale).await.unwrap();
        assert_eq!(written.likes_count, 9);
    }
}
