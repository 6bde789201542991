//! Collaborator trait definitions.
//!
//! The feed pipeline never talks to MySQL or the identity service directly;
//! it goes through these narrow interfaces so that services can be tested
//! against in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_core::{
    CachedComment, CachedPost, CachedUser, FeedResult, KeysetPage, KeysetRequest, PostId, UserId,
};

/// Identity and subscription lookups owned by the user service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Ids of the users that `user_id` follows.
    async fn followee_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>>;

    /// Ids of the users following `user_id`.
    async fn follower_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>>;

    /// Checks whether the user is active.
    async fn is_active(&self, user_id: UserId) -> FeedResult<bool>;

    /// Checks whether the user exists.
    async fn exists(&self, user_id: UserId) -> FeedResult<bool>;

    /// Fetches identity snapshots for many users in one call.
    ///
    /// Unknown ids are simply absent from the result.
    async fn identity_snapshots(&self, user_ids: &[UserId]) -> FeedResult<Vec<CachedUser>>;

    /// Asks the identity service to refresh its own cache.
    async fn refresh_identity_cache(&self) -> FeedResult<()>;
}

/// Read access to published posts.
///
/// Every listing is returned in timeline order: newest first, ties broken by
/// the larger id first. Only published, non-deleted posts are visible.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Newest `limit` posts written by any of `followee_ids`.
    async fn newest_by_followees(
        &self,
        followee_ids: &[UserId],
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>>;

    /// Newest `limit` posts written by any of `followee_ids` that come
    /// strictly after `cursor` in timeline order.
    async fn newest_by_followees_after(
        &self,
        followee_ids: &[UserId],
        cursor: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>>;

    /// Checks whether the post exists.
    async fn exists(&self, post_id: PostId) -> FeedResult<bool>;

    /// Checks whether the post was written by one of `followee_ids`.
    async fn belongs_to_followees(
        &self,
        followee_ids: &[UserId],
        post_id: PostId,
    ) -> FeedResult<bool>;

    /// Loads posts by id. Unknown ids are absent from the result.
    async fn by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<CachedPost>>;

    /// Ids of the posts published at or after `since`, newest first.
    ///
    /// Walking the listing with the returned `next` requests visits every
    /// such post once, even while new posts are being published.
    async fn recent_post_ids(
        &self,
        since: DateTime<Utc>,
        request: KeysetRequest,
    ) -> FeedResult<KeysetPage<PostId>>;
}

/// Read access to comments.
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// The newest `limit` comments on a post, newest first.
    async fn latest_by_post(&self, post_id: PostId, limit: usize)
        -> FeedResult<Vec<CachedComment>>;
}
