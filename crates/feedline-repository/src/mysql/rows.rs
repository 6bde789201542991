//! Database row representations and their projections.

use chrono::{DateTime, Utc};
use feedline_core::{CachedComment, CachedPost, CommentId, PostId, TimelineKey, UserId};
use sqlx::FromRow;
use std::collections::VecDeque;

/// Select list shared by every post query; `p` is the post being read.
pub(crate) const POST_SELECT: &str = r#"
    SELECT p.id, p.author_id, p.project_id, p.content,
           (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS likes_count,
           (SELECT COUNT(*) FROM comment cm WHERE cm.post_id = p.id) AS comments_count,
           p.views AS views_count,
           p.published_at, p.updated_at
"#;

/// A post is visible once published and until deleted.
pub(crate) const POST_VISIBLE: &str = "p.published = TRUE AND p.deleted = FALSE";

/// Timeline order: newest first, larger id first on equal timestamps.
pub(crate) const TIMELINE_ORDER: &str = " ORDER BY p.published_at DESC, p.id DESC";

/// Database row representation of a post with its aggregate counters.
#[derive(Debug, FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub project_id: Option<i64>,
    pub content: String,
    pub likes_count: i64,
    pub comments_count: i64,
    pub views_count: i64,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PostRow> for CachedPost {
    fn from(row: PostRow) -> Self {
        Self {
            post_id: PostId::new(row.id),
            author_id: UserId::new(row.author_id),
            project_id: row.project_id,
            content: row.content,
            likes_count: count(row.likes_count),
            comments_count: count(row.comments_count),
            views_count: count(row.views_count),
            comments: VecDeque::new(),
            published_at: row.published_at,
            updated_at: row.updated_at,
        }
    }
}

/// Id and timeline position of a post in a recent-posts listing.
#[derive(Debug, FromRow)]
pub(crate) struct RecentRow {
    pub id: i64,
    pub published_at: DateTime<Utc>,
}

impl RecentRow {
    pub(crate) fn keyed(self) -> (PostId, TimelineKey) {
        let id = PostId::new(self.id);
        (id, TimelineKey::new(self.published_at, id))
    }
}

/// Database row representation of a comment.
#[derive(Debug, FromRow)]
pub(crate) struct CommentRow {
    pub id: i64,
    pub author_id: i64,
    pub post_id: i64,
    pub content: String,
    pub likes_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CommentRow> for CachedComment {
    fn from(row: CommentRow) -> Self {
        Self {
            comment_id: CommentId::new(row.id),
            author_id: UserId::new(row.author_id),
            post_id: PostId::new(row.post_id),
            content: row.content,
            likes_count: count(row.likes_count),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Negative aggregates cannot occur; clamp them to zero rather than wrap.
fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Converts a listing size into a `LIMIT` argument.
pub(crate) fn limit_arg(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
