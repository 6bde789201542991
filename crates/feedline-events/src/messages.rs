//! Events exchanged between feedline instances.

use crate::event::Event;
use feedline_core::{CachedComment, CachedPost, PostId, UserId};
use serde::{Deserialize, Serialize};

/// Queue for feed fan-out and warming.
pub const FEED_QUEUE: &str = "feed";
/// Queue for counter updates on cached posts.
pub const POST_ACTIVITY_QUEUE: &str = "post-activity";
/// Queue for scheduled heating and reclamation.
pub const MAINTENANCE_QUEUE: &str = "maintenance";

/// A post was published; fan it out to the followers' feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPublished {
    pub post: CachedPost,
    pub follower_ids: Vec<UserId>,
}

impl Event for PostPublished {
    const NAME: &'static str = "post-published";
    const QUEUE: &'static str = FEED_QUEUE;
}

/// A comment was created on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentCreated {
    pub comment: CachedComment,
}

impl Event for CommentCreated {
    const NAME: &'static str = "comment-created";
    const QUEUE: &'static str = POST_ACTIVITY_QUEUE;
}

/// A user liked a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeAdded {
    pub post_id: PostId,
    pub user_id: UserId,
}

impl Event for LikeAdded {
    const NAME: &'static str = "like-added";
    const QUEUE: &'static str = POST_ACTIVITY_QUEUE;
}

/// A post was viewed, possibly anonymously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostViewed {
    pub post_id: PostId,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl Event for PostViewed {
    const NAME: &'static str = "post-viewed";
    const QUEUE: &'static str = POST_ACTIVITY_QUEUE;
}

/// One unit of post-cache heating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatPostCacheBatch {
    pub post_ids: Vec<PostId>,
}

impl Event for HeatPostCacheBatch {
    const NAME: &'static str = "heat-post-cache-batch";
    const QUEUE: &'static str = MAINTENANCE_QUEUE;
}

/// Warm the identity snapshots of these users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUserWarm {
    pub user_ids: Vec<UserId>,
}

impl Event for CacheUserWarm {
    const NAME: &'static str = "cache-user-warm";
    const QUEUE: &'static str = MAINTENANCE_QUEUE;
}

/// Rebuild the feeds of these users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatFeedCache {
    pub user_ids: Vec<UserId>,
}

impl Event for HeatFeedCache {
    const NAME: &'static str = "heat-feed-cache";
    const QUEUE: &'static str = FEED_QUEUE;
}

/// Scheduled trigger: start heating recent posts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCacheHeat {}

impl Event for StartCacheHeat {
    const NAME: &'static str = "start-cache-heat";
    const QUEUE: &'static str = MAINTENANCE_QUEUE;
    const MAX_RETRIES: u32 = 1;
}

/// Scheduled trigger: sweep stale cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimCache {}

impl Event for ReclaimCache {
    const NAME: &'static str = "reclaim-cache";
    const QUEUE: &'static str = MAINTENANCE_QUEUE;
    const MAX_RETRIES: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEnvelope;

    #[test]
    fn test_anonymous_view_decodes_without_user() {
        let mut envelope = EventEnvelope::new(&PostViewed {
            post_id: PostId::new(7),
            user_id: None,
        })
        .unwrap();
        envelope.payload = r#"{"post_id":7}"#.to_string();

        let viewed: PostViewed = envelope.decode().unwrap();
        assert_eq!(viewed.post_id, PostId::new(7));
        assert!(viewed.user_id.is_none());
    }

    #[test]
    fn test_events_route_to_their_queues() {
        let like = EventEnvelope::new(&LikeAdded {
            post_id: PostId::new(1),
            user_id: UserId::new(2),
        })
        .unwrap();
        assert_eq!(like.name, "like-added");
        assert_eq!(like.queue, POST_ACTIVITY_QUEUE);

        let heat = EventEnvelope::new(&StartCacheHeat::default()).unwrap();
        assert_eq!(heat.queue, MAINTENANCE_QUEUE);
        assert_eq!(heat.max_attempts, 2);
    }
}
