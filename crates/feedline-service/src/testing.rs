//! In-memory collaborators and a fully wired service graph for tests.

use crate::caches::FeedCaches;
use crate::consumers::{fanout_pool_config, maintenance_pool_config, EventConsumers};
use crate::feed_assembler::FeedAssembler;
use crate::heater::CacheHeater;
use crate::post_cache_service::PostCacheService;
use crate::reclaimer::CacheReclaimer;
use crate::task_pool::TaskPool;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use feedline_cache::{EventDeduplicator, MemoryEventDeduplicator};
use feedline_config::AppConfig;
use feedline_core::{
    sort_timeline, CachedComment, CachedPost, CachedUser, CommentId, FeedError, FeedResult,
    KeysetPage, KeysetRequest, PostId, TimelineKey, UserId,
};
use feedline_events::{EventBus, EventPublisher, MemoryEventBus, WorkerPool};
use feedline_repository::{CommentStore, PostStore, UserDirectory};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A post published `secs` seconds after a fixed epoch.
pub(crate) fn post(id: i64, author: i64, secs: i64) -> CachedPost {
    CachedPost::new(PostId::new(id), UserId::new(author), format!("post {id}"), at(secs))
}

/// A post published `days_ago` days before now.
pub(crate) fn recent_post(id: i64, author: i64, days_ago: i64) -> CachedPost {
    CachedPost::new(
        PostId::new(id),
        UserId::new(author),
        format!("post {id}"),
        Utc::now() - Duration::days(days_ago),
    )
}

pub(crate) fn comment(id: i64, post_id: i64, secs: i64) -> CachedComment {
    CachedComment {
        comment_id: CommentId::new(id),
        author_id: UserId::new(1),
        post_id: PostId::new(post_id),
        content: format!("comment {id}"),
        likes_count: 0,
        created_at: at(secs),
        updated_at: at(secs),
    }
}

pub(crate) fn user(id: i64, active: bool) -> CachedUser {
    CachedUser {
        user_id: UserId::new(id),
        username: format!("user{id}"),
        active,
        profile_picture: None,
    }
}

/// Follow graph and identity snapshots.
#[derive(Default)]
pub(crate) struct FakeDirectory {
    users: Mutex<BTreeMap<UserId, CachedUser>>,
    follows: Mutex<BTreeSet<(UserId, UserId)>>,
    failing: Mutex<HashSet<UserId>>,
    refreshes: AtomicUsize,
}

impl FakeDirectory {
    pub fn add_user(&self, id: i64, active: bool) {
        self.users.lock().insert(UserId::new(id), user(id, active));
    }

    pub fn follow(&self, follower: i64, followee: i64) {
        self.follows
            .lock()
            .insert((UserId::new(follower), UserId::new(followee)));
    }

    /// Makes followee lookups for `id` fail.
    pub fn fail_followees_of(&self, id: i64) {
        self.failing.lock().insert(UserId::new(id));
    }

    pub fn followers_of(&self, author: UserId) -> Vec<UserId> {
        self.follows
            .lock()
            .iter()
            .filter(|(_, followee)| *followee == author)
            .map(|(follower, _)| *follower)
            .collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn followee_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>> {
        if self.failing.lock().contains(&user_id) {
            return Err(FeedError::external("user-service", "unavailable"));
        }
        Ok(self
            .follows
            .lock()
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect())
    }

    async fn follower_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>> {
        Ok(self.followers_of(user_id))
    }

    async fn is_active(&self, user_id: UserId) -> FeedResult<bool> {
        Ok(self.users.lock().get(&user_id).is_some_and(|u| u.active))
    }

    async fn exists(&self, user_id: UserId) -> FeedResult<bool> {
        Ok(self.users.lock().contains_key(&user_id))
    }

    async fn identity_snapshots(&self, user_ids: &[UserId]) -> FeedResult<Vec<CachedUser>> {
        let users = self.users.lock();
        Ok(user_ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn refresh_identity_cache(&self) -> FeedResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Posts kept in a vector, with call counters for the read paths.
#[derive(Default)]
pub(crate) struct FakePostStore {
    posts: Mutex<Vec<CachedPost>>,
    by_ids_calls: AtomicUsize,
    after_requests: Mutex<Vec<(PostId, usize)>>,
    failing: AtomicBool,
}

impl FakePostStore {
    pub fn insert(&self, post: CachedPost) {
        let mut posts = self.posts.lock();
        posts.retain(|p| p.post_id != post.post_id);
        posts.push(post);
    }

    pub fn all(&self) -> Vec<CachedPost> {
        self.posts.lock().clone()
    }

    pub fn by_ids_calls(&self) -> usize {
        self.by_ids_calls.load(Ordering::SeqCst)
    }

    pub fn after_calls(&self) -> usize {
        self.after_requests.lock().len()
    }

    /// Cursor and limit of every read below a cursor.
    pub fn after_requests(&self) -> Vec<(PostId, usize)> {
        self.after_requests.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.by_ids_calls.store(0, Ordering::SeqCst);
        self.after_requests.lock().clear();
    }

    /// Makes every read fail with a store error.
    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> FeedResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::store("post store unavailable"));
        }
        Ok(())
    }

    fn by_followees(&self, followee_ids: &[UserId]) -> Vec<CachedPost> {
        let mut posts: Vec<CachedPost> = self
            .posts
            .lock()
            .iter()
            .filter(|p| followee_ids.contains(&p.author_id))
            .cloned()
            .collect();
        sort_timeline(&mut posts);
        posts
    }

    fn find(&self, post_id: PostId) -> Option<CachedPost> {
        self.posts.lock().iter().find(|p| p.post_id == post_id).cloned()
    }
}

#[async_trait]
impl PostStore for FakePostStore {
    async fn newest_by_followees(
        &self,
        followee_ids: &[UserId],
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>> {
        self.check()?;
        let mut posts = self.by_followees(followee_ids);
        posts.truncate(limit);
        Ok(posts)
    }

    async fn newest_by_followees_after(
        &self,
        followee_ids: &[UserId],
        cursor: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>> {
        self.check()?;
        self.after_requests.lock().push((cursor, limit));
        let Some(anchor) = self.find(cursor) else {
            return Ok(Vec::new());
        };
        Ok(self
            .by_followees(followee_ids)
            .into_iter()
            .filter(|p| p.is_after_cursor(anchor.published_at, anchor.post_id))
            .take(limit)
            .collect())
    }

    async fn exists(&self, post_id: PostId) -> FeedResult<bool> {
        self.check()?;
        Ok(self.find(post_id).is_some())
    }

    async fn belongs_to_followees(
        &self,
        followee_ids: &[UserId],
        post_id: PostId,
    ) -> FeedResult<bool> {
        self.check()?;
        Ok(self
            .find(post_id)
            .is_some_and(|p| followee_ids.contains(&p.author_id)))
    }

    async fn by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<CachedPost>> {
        self.check()?;
        self.by_ids_calls.fetch_add(1, Ordering::SeqCst);
        Ok(post_ids.iter().filter_map(|id| self.find(*id)).collect())
    }

    async fn recent_post_ids(
        &self,
        since: DateTime<Utc>,
        request: KeysetRequest,
    ) -> FeedResult<KeysetPage<PostId>> {
        self.check()?;
        let mut recent: Vec<CachedPost> = self
            .posts
            .lock()
            .iter()
            .filter(|p| p.published_at >= since)
            .cloned()
            .collect();
        sort_timeline(&mut recent);

        let rows = recent
            .iter()
            .map(|p| (p.post_id, TimelineKey::of(p)))
            .filter(|(_, key)| request.admits(key))
            .take(request.limit())
            .collect();
        Ok(KeysetPage::from_keyed(rows, request))
    }
}

#[derive(Default)]
pub(crate) struct FakeCommentStore {
    comments: Mutex<Vec<CachedComment>>,
}

impl FakeCommentStore {
    pub fn insert(&self, comment: CachedComment) {
        self.comments.lock().push(comment);
    }
}

#[async_trait]
impl CommentStore for FakeCommentStore {
    async fn latest_by_post(
        &self,
        post_id: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedComment>> {
        let mut comments: Vec<CachedComment> = self
            .comments
            .lock()
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.comment_id.cmp(&a.comment_id))
        });
        comments.truncate(limit);
        Ok(comments)
    }
}

/// Every service wired against in-memory caches, fakes and an in-memory bus.
pub(crate) struct Harness {
    pub config: AppConfig,
    pub caches: FeedCaches,
    pub directory: Arc<FakeDirectory>,
    pub posts: Arc<FakePostStore>,
    pub comments: Arc<FakeCommentStore>,
    pub bus: Arc<MemoryEventBus>,
    pub dedup: Arc<MemoryEventDeduplicator>,
    pub post_service: PostCacheService,
    pub assembler: FeedAssembler,
    pub heater: CacheHeater,
    pub reclaimer: CacheReclaimer,
    pub consumers: EventConsumers,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        configure(&mut config);

        let caches = FeedCaches::in_memory(&config.cache);
        let directory = Arc::new(FakeDirectory::default());
        let posts = Arc::new(FakePostStore::default());
        let comments = Arc::new(FakeCommentStore::default());
        let bus = Arc::new(MemoryEventBus::new(&config.events));
        let dedup = Arc::new(MemoryEventDeduplicator::new(config.cache.dedup_ttl()));

        let fanout = TaskPool::new("fanout", config.pools.fanout_concurrency);
        let maintenance = TaskPool::new("maintenance", config.pools.maintenance_concurrency);

        let post_service = PostCacheService::new(
            &caches,
            posts.clone(),
            comments.clone(),
            config.feed.comments_in_post,
        );
        let assembler = FeedAssembler::new(
            caches.clone(),
            directory.clone(),
            posts.clone(),
            post_service.clone(),
            fanout,
            config.feed.clone(),
        );
        let heater = CacheHeater::new(
            directory.clone(),
            posts.clone(),
            post_service.clone(),
            caches.users.clone(),
            assembler.clone(),
            bus.clone() as Arc<dyn EventPublisher>,
            config.heater.clone(),
        );
        let reclaimer = CacheReclaimer::new(caches.clone(), maintenance, config.reclaimer.clone());
        let consumers = EventConsumers::new(
            assembler.clone(),
            post_service.clone(),
            heater.clone(),
            reclaimer.clone(),
            directory.clone(),
            dedup.clone() as Arc<dyn EventDeduplicator>,
        );

        Self {
            config,
            caches,
            directory,
            posts,
            comments,
            bus,
            dedup,
            post_service,
            assembler,
            heater,
            reclaimer,
            consumers,
        }
    }

    /// Fan-out and maintenance worker pools with every consumer registered.
    pub fn worker_pools(&self) -> (WorkerPool, WorkerPool) {
        let bus = self.bus.clone() as Arc<dyn EventBus>;
        let fanout = WorkerPool::new(bus.clone(), fanout_pool_config(&self.config));
        let maintenance = WorkerPool::new(bus, maintenance_pool_config(&self.config));
        self.consumers.register(&fanout, &maintenance);
        (fanout, maintenance)
    }
}
