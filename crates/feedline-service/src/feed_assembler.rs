//! Feed assembly: rebuilding feeds, fan-out on write and hybrid paging.
//!
//! A user's cached feed holds at most `posts_in_feed` post ids, newest
//! first. Pages are served from it while it lasts; once a cursor runs past
//! the cached window, or the feed is not cached at all, the post store
//! answers instead and both sources are merged in timeline order.

use crate::caches::FeedCaches;
use crate::metrics::names;
use crate::post_cache_service::PostCacheService;
use crate::task_pool::TaskPool;
use feedline_config::FeedConfig;
use feedline_core::{
    sort_timeline, CachedPost, CachedUser, FeedEntrySet, FeedError, FeedPage, FeedResult, PostId,
    RequestContext, UserId,
};
use feedline_repository::{PostStore, UserDirectory};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Which sources a feed page was assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// No cached feed; newest posts read from the store.
    StoreFirstPage,
    /// No cached feed; posts after the cursor read from the store.
    StoreAfterCursor,
    /// Cursor not in the cached feed; posts after it read from the store.
    StoreFallback,
    /// First page of the cached feed.
    CacheFirstPage,
    /// Full page after the cursor from the cached feed.
    CacheAfterCursor,
    /// Cached remainder merged with posts from the store.
    Merged,
}

impl FeedSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoreFirstPage => "store_first_page",
            Self::StoreAfterCursor => "store_after_cursor",
            Self::StoreFallback => "store_fallback",
            Self::CacheFirstPage => "cache_first_page",
            Self::CacheAfterCursor => "cache_after_cursor",
            Self::Merged => "merged",
        }
    }
}

/// What fan-out did for one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerOutcome {
    Inserted,
    AlreadyPresent,
    Inactive,
}

impl FollowerOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::AlreadyPresent => "already_present",
            Self::Inactive => "inactive",
        }
    }
}

/// Result of fanning one post out to its followers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub inserted: usize,
    pub already_present: usize,
    pub inactive: usize,
    /// Followers whose feed could not be updated.
    pub failed: Vec<UserId>,
}

impl FanoutReport {
    fn record(&mut self, outcome: FollowerOutcome) {
        match outcome {
            FollowerOutcome::Inserted => self.inserted += 1,
            FollowerOutcome::AlreadyPresent => self.already_present += 1,
            FollowerOutcome::Inactive => self.inactive += 1,
        }
    }
}

/// Handle on a dispatched fan-out.
///
/// Dropping it leaves the per-follower tasks running; [`wait`](Self::wait)
/// joins them all.
#[derive(Debug)]
pub struct FanoutHandle {
    post_id: PostId,
    post_write: JoinHandle<FeedResult<()>>,
    deliveries: Vec<(UserId, JoinHandle<FeedResult<FollowerOutcome>>)>,
}

impl FanoutHandle {
    #[must_use]
    pub const fn post_id(&self) -> PostId {
        self.post_id
    }

    /// Number of followers the post was dispatched to.
    #[must_use]
    pub fn followers(&self) -> usize {
        self.deliveries.len()
    }

    /// Wait for every follower; failures are isolated per follower.
    pub async fn wait(self) -> FanoutReport {
        let post_id = self.post_id;
        match self.post_write.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(post_id = %post_id, error = %e, "Failed to cache fanned-out post"),
            Err(e) => warn!(post_id = %post_id, error = %e, "Post cache task aborted"),
        }

        let mut report = FanoutReport::default();
        for (follower_id, delivery) in self.deliveries {
            let outcome = delivery
                .await
                .unwrap_or_else(|e| Err(FeedError::internal(format!("fan-out task aborted: {e}"))));
            match outcome {
                Ok(outcome) => {
                    metrics::counter!(names::FANOUT_DELIVERIES_TOTAL, "outcome" => outcome.as_str())
                        .increment(1);
                    report.record(outcome);
                }
                Err(e) => {
                    metrics::counter!(names::FANOUT_DELIVERIES_TOTAL, "outcome" => "failed")
                        .increment(1);
                    warn!(
                        post_id = %post_id,
                        follower_id = %follower_id,
                        error = %e,
                        "Fan-out to follower failed"
                    );
                    report.failed.push(follower_id);
                }
            }
        }

        debug!(
            post_id = %post_id,
            inserted = report.inserted,
            inactive = report.inactive,
            failed = report.failed.len(),
            "Fan-out finished"
        );
        report
    }
}

/// Result of rebuilding several feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub filled: usize,
    pub failed: Vec<UserId>,
}

/// Builds, updates and pages through users' feeds.
#[derive(Clone)]
pub struct FeedAssembler {
    caches: FeedCaches,
    directory: Arc<dyn UserDirectory>,
    post_store: Arc<dyn PostStore>,
    post_service: PostCacheService,
    fanout: TaskPool,
    config: FeedConfig,
}

impl FeedAssembler {
    pub fn new(
        caches: FeedCaches,
        directory: Arc<dyn UserDirectory>,
        post_store: Arc<dyn PostStore>,
        post_service: PostCacheService,
        fanout: TaskPool,
        config: FeedConfig,
    ) -> Self {
        Self {
            caches,
            directory,
            post_store,
            post_service,
            fanout,
            config,
        }
    }

    /// Capacity of a cached feed.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.posts_in_feed
    }

    /// Reads the newest posts of a user's followees and derives the feed
    /// from them. Posts are written to the post cache; the feed is not.
    async fn build_feed(&self, user_id: UserId, batch_size: usize) -> FeedResult<FeedEntrySet> {
        let followees = self.directory.followee_ids(user_id).await?;
        let posts = self.newest_from_store(&followees, batch_size).await?;

        if !posts.is_empty() {
            self.post_service.upsert_many(posts.clone()).await?;
        }

        Ok(FeedEntrySet::from_ordered(
            user_id,
            posts.iter().map(|p| p.post_id),
            self.capacity(),
        ))
    }

    /// Rebuilds a user's feed from the store and caches it.
    #[instrument(skip(self))]
    pub async fn fill_feed(&self, user_id: UserId, batch_size: usize) -> FeedResult<FeedEntrySet> {
        let feed = self
            .caches
            .feeds
            .with_lock(user_id, || async move {
                let feed = self.build_feed(user_id, batch_size).await?;
                self.caches.feeds.put(&feed).await?;
                Ok(feed)
            })
            .await?;

        metrics::counter!(names::FEED_FILLS_TOTAL).increment(1);
        debug!(user_id = %user_id, posts = feed.len(), "Filled feed");
        Ok(feed)
    }

    /// Rebuilds several feeds concurrently on the fan-out pool.
    pub async fn fill_feeds(&self, user_ids: &[UserId]) -> FillReport {
        let capacity = self.capacity();
        let tasks = user_ids.iter().map(|&user_id| {
            let this = self.clone();
            async move { this.fill_feed(user_id, capacity).await }
        });
        let results = self.fanout.join_all(tasks).await;

        let mut report = FillReport::default();
        for (&user_id, result) in user_ids.iter().zip(results) {
            match result {
                Ok(_) => report.filled += 1,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to fill feed");
                    report.failed.push(user_id);
                }
            }
        }
        report
    }

    fn seed_in_background(&self, user_id: UserId) {
        let this = self.clone();
        let capacity = self.capacity();
        self.fanout.spawn_detached("fill-feed", async move {
            this.fill_feed(user_id, capacity).await
        });
    }

    /// A follower's cached snapshot decides; without one the directory does.
    async fn is_follower_active(&self, follower_id: UserId) -> FeedResult<bool> {
        match self.caches.users.get(follower_id).await? {
            Some(user) => Ok(user.active),
            None => self.directory.is_active(follower_id).await,
        }
    }

    async fn add_to_follower_feed(
        &self,
        post_id: PostId,
        follower_id: UserId,
    ) -> FeedResult<FollowerOutcome> {
        if !self.is_follower_active(follower_id).await? {
            return Ok(FollowerOutcome::Inactive);
        }

        let capacity = self.capacity();
        self.caches
            .feeds
            .with_lock(follower_id, || async move {
                let mut feed = match self.caches.feeds.get(follower_id).await? {
                    Some(feed) => feed,
                    None => self.build_feed(follower_id, capacity).await?,
                };

                let outcome = if feed.contains(post_id) {
                    FollowerOutcome::AlreadyPresent
                } else {
                    if let Some(evicted) = feed.insert(post_id, capacity) {
                        debug!(follower_id = %follower_id, evicted = %evicted, "Evicted oldest feed entry");
                    }
                    FollowerOutcome::Inserted
                };

                self.caches.feeds.put(&feed).await?;
                Ok(outcome)
            })
            .await
    }

    /// Starts fanning a post out to its followers and returns at once.
    ///
    /// Every follower is handled on its own task of the fan-out pool; the
    /// post itself is written to the post cache alongside.
    pub fn dispatch_fanout(&self, post: CachedPost, follower_ids: Vec<UserId>) -> FanoutHandle {
        let post_id = post.post_id;
        let followers: BTreeSet<UserId> = follower_ids.into_iter().collect();

        let writer = self.post_service.clone();
        let post_write = self
            .fanout
            .spawn(async move { writer.upsert(post).await.map(|_| ()) });

        let deliveries = followers
            .into_iter()
            .map(|follower_id| {
                let this = self.clone();
                let handle = self
                    .fanout
                    .spawn(async move { this.add_to_follower_feed(post_id, follower_id).await });
                (follower_id, handle)
            })
            .collect();

        FanoutHandle {
            post_id,
            post_write,
            deliveries,
        }
    }

    /// Fans a post out and waits until every follower has been handled.
    #[instrument(skip(self, post, follower_ids), fields(post_id = %post.post_id, followers = follower_ids.len()))]
    pub async fn add_post_to_feeds(&self, post: CachedPost, follower_ids: Vec<UserId>) -> FanoutReport {
        self.dispatch_fanout(post, follower_ids).wait().await
    }

    async fn newest_from_store(&self, followees: &[UserId], limit: usize) -> FeedResult<Vec<CachedPost>> {
        let mut posts = self.post_store.newest_by_followees(followees, limit).await?;
        sort_timeline(&mut posts);
        self.post_service.with_latest_comments(posts).await
    }

    async fn after_from_store(
        &self,
        followees: &[UserId],
        cursor: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>> {
        let mut posts = self
            .post_store
            .newest_by_followees_after(followees, cursor, limit)
            .await?;
        sort_timeline(&mut posts);
        self.post_service.with_latest_comments(posts).await
    }

    /// Checks the user exists and that the cursor, if any, is a post of one
    /// of their followees. Returns the followees.
    async fn validate(&self, user_id: UserId, last_viewed: Option<PostId>) -> FeedResult<Vec<UserId>> {
        if !self.directory.exists(user_id).await? {
            return Err(FeedError::validation(format!("User {user_id} does not exist")));
        }

        let followees = self.directory.followee_ids(user_id).await?;

        if let Some(cursor) = last_viewed {
            if !self.post_store.exists(cursor).await? {
                return Err(FeedError::validation(format!("Post {cursor} does not exist")));
            }
            if !self.post_store.belongs_to_followees(&followees, cursor).await? {
                return Err(FeedError::validation(format!(
                    "Post {cursor} is not in the timeline of user {user_id}"
                )));
            }
        }

        Ok(followees)
    }

    async fn page_after_cursor(
        &self,
        feed: &FeedEntrySet,
        followees: &[UserId],
        cursor: PostId,
    ) -> FeedResult<(FeedSource, Vec<CachedPost>)> {
        let page_size = self.config.page_size;
        let position = feed.locate(cursor);

        if !position.found {
            let posts = self.after_from_store(followees, cursor, page_size).await?;
            return Ok((FeedSource::StoreFallback, posts));
        }

        if position.remaining >= page_size {
            let posts = self
                .post_service
                .resolve(&feed.page_after(position, page_size))
                .await?;
            return Ok((FeedSource::CacheAfterCursor, posts));
        }

        let remainder = feed.page_after(position, position.remaining);
        let cached = self.post_service.resolve(&remainder).await?;

        // the store continues below the oldest cached post; if that post is
        // gone, a full page below the cursor is read and merged instead
        let (from, limit) = match remainder.last() {
            Some(&tail) if cached.iter().any(|p| p.post_id == tail) => {
                (tail, page_size - position.remaining)
            }
            _ => (cursor, page_size),
        };
        let stored = self.after_from_store(followees, from, limit).await?;
        Ok((FeedSource::Merged, merge_pages(cached, stored, page_size)))
    }

    /// Identity snapshots of the page's authors, cache first.
    ///
    /// Misses are fetched from the directory in one call and not written
    /// back to the cache.
    async fn resolve_authors(&self, posts: &[CachedPost]) -> FeedResult<Vec<CachedUser>> {
        let mut author_ids = Vec::new();
        for post in posts {
            if !author_ids.contains(&post.author_id) {
                author_ids.push(post.author_id);
            }
        }

        let lookup = self.caches.users.get_many(&author_ids).await?;
        let mut by_id: HashMap<UserId, CachedUser> =
            lookup.found.into_iter().map(|u| (u.user_id, u)).collect();

        if !lookup.missing.is_empty() {
            let snapshots = self.directory.identity_snapshots(&lookup.missing).await?;
            by_id.extend(snapshots.into_iter().map(|u| (u.user_id, u)));
        }

        Ok(author_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Serves one page of a user's news feed.
    ///
    /// Without `last_viewed` the first page is returned; otherwise the page
    /// after that post.
    #[instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id, user_id = %ctx.user_id)
    )]
    pub async fn get_news_feed_batch(
        &self,
        ctx: &RequestContext,
        last_viewed: Option<PostId>,
    ) -> FeedResult<FeedPage> {
        let started = Instant::now();
        let user_id = ctx.user_id;
        let page_size = self.config.page_size;

        let followees = self.validate(user_id, last_viewed).await?;
        let cached_feed = self.caches.feeds.get(user_id).await?;

        let (source, posts) = match (cached_feed, last_viewed) {
            (None, None) => {
                let posts = self.newest_from_store(&followees, page_size).await?;
                self.seed_in_background(user_id);
                (FeedSource::StoreFirstPage, posts)
            }
            (None, Some(cursor)) => {
                let posts = self.after_from_store(&followees, cursor, page_size).await?;
                self.seed_in_background(user_id);
                (FeedSource::StoreAfterCursor, posts)
            }
            (Some(feed), None) => {
                let posts = self.post_service.resolve(&feed.first_page(page_size)).await?;
                (FeedSource::CacheFirstPage, posts)
            }
            (Some(feed), Some(cursor)) => self.page_after_cursor(&feed, &followees, cursor).await?,
        };

        let authors = self.resolve_authors(&posts).await?;

        metrics::counter!(names::FEED_PAGES_TOTAL, "source" => source.as_str()).increment(1);
        metrics::histogram!(names::FEED_PAGE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            user_id = %user_id,
            source = source.as_str(),
            posts = posts.len(),
            "Served feed page"
        );

        Ok(FeedPage { posts, authors })
    }
}

/// Merges cached and stored posts into one page in timeline order.
///
/// A post present in both keeps its cached copy, whose counters are live.
fn merge_pages(cached: Vec<CachedPost>, stored: Vec<CachedPost>, limit: usize) -> Vec<CachedPost> {
    let mut by_id: HashMap<PostId, CachedPost> = stored.into_iter().map(|p| (p.post_id, p)).collect();
    by_id.extend(cached.into_iter().map(|p| (p.post_id, p)));

    let mut merged: Vec<CachedPost> = by_id.into_values().collect();
    sort_timeline(&mut merged);
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, Harness};
    use std::time::Duration;

    fn ids(page: &FeedPage) -> Vec<i64> {
        page.posts.iter().map(|p| p.post_id.0).collect()
    }

    fn feed_ids(feed: &FeedEntrySet) -> Vec<i64> {
        feed.ids().map(|id| id.0).collect()
    }

    /// U(1) follows A(2) and B(3).
    fn follow_graph(h: &Harness) {
        for id in 1..=4 {
            h.directory.add_user(id, true);
        }
        h.directory.follow(1, 2);
        h.directory.follow(1, 3);
    }

    async fn publish(h: &Harness, post: CachedPost) -> FanoutReport {
        h.posts.insert(post.clone());
        let followers = h.directory.followers_of(post.author_id);
        h.assembler.add_post_to_feeds(post, followers).await
    }

    async fn wait_for_feed(h: &Harness, user_id: i64) -> FeedEntrySet {
        for _ in 0..200 {
            if let Some(feed) = h.caches.feeds.get(UserId::new(user_id)).await.unwrap() {
                return feed;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("feed of user {user_id} was never cached");
    }

    #[tokio::test]
    async fn test_first_page_newest_first() {
        let h = Harness::new();
        follow_graph(&h);
        publish(&h, post(1, 2, 10)).await;
        publish(&h, post(2, 3, 20)).await;

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), None)
            .await
            .unwrap();

        assert_eq!(ids(&page), vec![2, 1]);
        let authors: Vec<i64> = page.authors.iter().map(|u| u.user_id.0).collect();
        assert_eq!(authors, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_fanout_evicts_oldest_at_capacity() {
        let h = Harness::with(|c| c.feed.posts_in_feed = 2);
        follow_graph(&h);
        publish(&h, post(1, 2, 10)).await;
        publish(&h, post(2, 3, 20)).await;
        publish(&h, post(3, 2, 30)).await;

        let feed = h.caches.feeds.get(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(feed_ids(&feed), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_feed_never_exceeds_capacity() {
        let h = Harness::with(|c| c.feed.posts_in_feed = 3);
        follow_graph(&h);
        for id in 1..=10 {
            publish(&h, post(id, 2 + id % 2, id * 10)).await;
            let feed = h.caches.feeds.get(UserId::new(1)).await.unwrap().unwrap();
            assert!(feed.len() <= 3);
        }
    }

    #[tokio::test]
    async fn test_merge_path_tops_up_from_store() {
        let h = Harness::with(|c| c.feed.page_size = 2);
        follow_graph(&h);
        h.posts.insert(post(10, 2, 5));
        h.caches
            .feeds
            .put(&FeedEntrySet::from_ordered(
                UserId::new(1),
                [3, 2, 1].map(PostId::new),
                500,
            ))
            .await
            .unwrap();
        h.posts.insert(post(1, 2, 10));
        h.posts.insert(post(2, 3, 20));
        h.posts.insert(post(3, 2, 30));

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(2)))
            .await
            .unwrap();

        assert_eq!(ids(&page), vec![1, 10]);
        assert_eq!(h.posts.after_requests(), vec![(PostId::new(1), 1)]);
    }

    #[tokio::test]
    async fn test_merge_path_reads_below_cursor_when_cached_tail_is_gone() {
        let h = Harness::with(|c| c.feed.page_size = 3);
        follow_graph(&h);
        h.caches
            .feeds
            .put(&FeedEntrySet::from_ordered(
                UserId::new(1),
                [3, 2, 1].map(PostId::new),
                500,
            ))
            .await
            .unwrap();
        h.posts.insert(post(2, 3, 20));
        h.posts.insert(post(3, 2, 30));
        h.posts.insert(post(10, 2, 5));
        h.posts.insert(post(11, 3, 4));

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(3)))
            .await
            .unwrap();

        assert_eq!(ids(&page), vec![2, 10, 11]);
        assert_eq!(h.posts.after_requests(), vec![(PostId::new(3), 3)]);
    }

    #[tokio::test]
    async fn test_full_page_after_cursor_comes_from_cache() {
        let h = Harness::with(|c| c.feed.page_size = 2);
        follow_graph(&h);
        for id in 1..=5 {
            h.posts.insert(post(id, 2, id * 10));
        }
        h.assembler.fill_feed(UserId::new(1), 500).await.unwrap();
        h.posts.reset_calls();

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(5)))
            .await
            .unwrap();

        assert_eq!(ids(&page), vec![4, 3]);
        assert_eq!(h.posts.after_calls(), 0);
    }

    #[tokio::test]
    async fn test_cursor_outside_followees_is_rejected() {
        let h = Harness::new();
        follow_graph(&h);
        h.posts.insert(post(9, 4, 10));

        let err = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(9)))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_unknown_user_and_cursor_are_rejected() {
        let h = Harness::new();
        follow_graph(&h);

        let unknown_user = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(77)), None)
            .await
            .unwrap_err();
        assert!(unknown_user.is_validation());

        let unknown_post = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(404)))
            .await
            .unwrap_err();
        assert!(unknown_post.is_validation());
    }

    #[tokio::test]
    async fn test_store_first_page_seeds_cache_in_background() {
        let h = Harness::with(|c| c.feed.page_size = 2);
        follow_graph(&h);
        for id in 1..=3 {
            h.posts.insert(post(id, 2, id * 10));
        }

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), None)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![3, 2]);

        let feed = wait_for_feed(&h, 1).await;
        assert_eq!(feed_ids(&feed), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_uncached_cursor_falls_back_to_store() {
        let h = Harness::with(|c| c.feed.page_size = 2);
        follow_graph(&h);
        for id in 1..=4 {
            h.posts.insert(post(id, 2, id * 10));
        }
        h.caches
            .feeds
            .put(&FeedEntrySet::from_ordered(UserId::new(1), [PostId::new(4)], 500))
            .await
            .unwrap();

        let page = h
            .assembler
            .get_news_feed_batch(&RequestContext::new(UserId::new(1)), Some(PostId::new(3)))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_hybrid_paging_matches_store_paging() {
        let h = Harness::with(|c| {
            c.feed.posts_in_feed = 5;
            c.feed.page_size = 3;
        });
        follow_graph(&h);
        // equal timestamps exercise the id tie-break
        for id in 1..=12 {
            h.posts.insert(post(id, 2 + id % 2, (id / 2) * 10));
        }
        h.assembler.fill_feed(UserId::new(1), 5).await.unwrap();

        let ctx = RequestContext::new(UserId::new(1));
        let mut hybrid = Vec::new();
        let mut cursor = None;
        loop {
            let page = h.assembler.get_news_feed_batch(&ctx, cursor).await.unwrap();
            if page.posts.is_empty() {
                break;
            }
            cursor = page.last_post_id();
            hybrid.extend(page.posts);
        }

        let mut expected = h.posts.all();
        sort_timeline(&mut expected);
        let expected: Vec<PostId> = expected.iter().map(|p| p.post_id).collect();
        let got: Vec<PostId> = hybrid.iter().map(|p| p.post_id).collect();
        assert_eq!(got, expected);
        for pair in hybrid.windows(2) {
            assert_eq!(pair[0].timeline_cmp(&pair[1]), std::cmp::Ordering::Less);
        }
    }

    #[tokio::test]
    async fn test_fill_feed_is_idempotent() {
        let h = Harness::new();
        follow_graph(&h);
        for id in 1..=4 {
            h.posts.insert(post(id, 2, id * 10));
        }

        let first = h.assembler.fill_feed(UserId::new(1), 500).await.unwrap();
        let second = h.assembler.fill_feed(UserId::new(1), 500).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(feed_ids(&second), vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_fanout_skips_inactive_and_isolates_failures() {
        let h = Harness::new();
        follow_graph(&h);
        h.directory.add_user(5, false);
        h.directory.follow(5, 2);
        h.directory.add_user(6, true);
        h.directory.follow(6, 2);
        h.directory.fail_followees_of(6);

        let report = publish(&h, post(1, 2, 10)).await;

        assert_eq!(report.inserted + report.already_present, 1);
        assert_eq!(report.inactive, 1);
        assert_eq!(report.failed, vec![UserId::new(6)]);
        assert!(h.caches.feeds.get(UserId::new(5)).await.unwrap().is_none());
        let feed = h.caches.feeds.get(UserId::new(1)).await.unwrap().unwrap();
        assert!(feed.contains(PostId::new(1)));
    }

    #[tokio::test]
    async fn test_dispatched_fanout_can_be_awaited_later() {
        let h = Harness::new();
        follow_graph(&h);
        let p = post(1, 2, 10);
        h.posts.insert(p.clone());

        let handle = h.assembler.dispatch_fanout(p, vec![UserId::new(1)]);
        assert_eq!(handle.followers(), 1);
        let report = handle.wait().await;

        assert_eq!(report.inserted + report.already_present, 1);
        assert!(h.caches.posts.get(PostId::new(1)).await.unwrap().is_some());
    }

    #[test]
    fn test_merge_prefers_cached_copy_and_truncates() {
        let mut cached = post(2, 1, 20);
        cached.likes_count = 9;
        let merged = merge_pages(
            vec![cached],
            vec![post(2, 1, 20), post(1, 1, 10), post(0, 1, 5)],
            2,
        );
        let ids: Vec<i64> = merged.iter().map(|p| p.post_id.0).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(merged[0].likes_count, 9);
    }
}
