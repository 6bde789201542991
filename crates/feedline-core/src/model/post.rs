//! Cached post projection.

use super::CacheRecord;
use crate::{CommentId, PostId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// A comment as shown beneath a cached post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedComment {
    pub comment_id: CommentId,
    pub author_id: UserId,
    pub post_id: PostId,
    pub content: String,
    pub likes_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized projection of a post as served in feeds.
///
/// Counters only ever grow through cache updates, and at most the configured
/// number of comments is kept, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPost {
    pub post_id: PostId,
    pub author_id: UserId,
    #[serde(default)]
    pub project_id: Option<i64>,
    pub content: String,
    pub likes_count: u64,
    pub comments_count: u64,
    pub views_count: u64,
    /// Most recent comments, newest first.
    #[serde(default)]
    pub comments: VecDeque<CachedComment>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRecord for CachedPost {
    const KIND: &'static str = "post";
    const SCHEMA_VERSION: u16 = 1;
    type Key = PostId;

    fn key(&self) -> PostId {
        self.post_id
    }
}

impl CachedPost {
    /// Creates a post with zeroed counters and no comments.
    #[must_use]
    pub fn new(
        post_id: PostId,
        author_id: UserId,
        content: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            post_id,
            author_id,
            project_id: None,
            content: content.into(),
            likes_count: 0,
            comments_count: 0,
            views_count: 0,
            comments: VecDeque::new(),
            published_at,
            updated_at: published_at,
        }
    }

    /// Compares two posts in timeline order: newest first, ties broken by
    /// the larger id first.
    #[must_use]
    pub fn timeline_cmp(&self, other: &Self) -> Ordering {
        other
            .published_at
            .cmp(&self.published_at)
            .then_with(|| other.post_id.cmp(&self.post_id))
    }

    /// Returns true if this post comes after the given cursor in timeline
    /// order, i.e. it is strictly older.
    #[must_use]
    pub fn is_after_cursor(&self, cursor_published_at: DateTime<Utc>, cursor_id: PostId) -> bool {
        self.published_at < cursor_published_at
            || (self.published_at == cursor_published_at && self.post_id < cursor_id)
    }

    pub fn increment_likes(&mut self) {
        self.likes_count = self.likes_count.saturating_add(1);
    }

    pub fn increment_views(&mut self) {
        self.views_count = self.views_count.saturating_add(1);
    }

    /// Records a new comment.
    ///
    /// The comment counter always grows; the comment itself is shown at the
    /// newest end unless it is already listed, and the oldest shown comment
    /// is dropped once more than `max_comments` are listed.
    pub fn add_comment(&mut self, comment: CachedComment, max_comments: usize) {
        self.comments_count = self.comments_count.saturating_add(1);

        if self.comments.iter().any(|c| c.comment_id == comment.comment_id) {
            return;
        }

        self.comments.push_front(comment);
        while self.comments.len() > max_comments {
            self.comments.pop_back();
        }
    }

    /// Replaces the shown comments with a freshly loaded list (newest first).
    pub fn set_comments(&mut self, comments: Vec<CachedComment>, max_comments: usize) {
        self.comments = comments.into_iter().take(max_comments).collect();
    }

    /// Folds a previously cached copy of the same post into this one.
    ///
    /// Counters take the larger value so a stale write never rolls them back.
    /// If this copy carries no comments the cached ones are kept.
    pub fn absorb(&mut self, cached: &Self) {
        self.likes_count = self.likes_count.max(cached.likes_count);
        self.comments_count = self.comments_count.max(cached.comments_count);
        self.views_count = self.views_count.max(cached.views_count);
        self.updated_at = self.updated_at.max(cached.updated_at);

        if self.comments.is_empty() {
            self.comments.clone_from(&cached.comments);
        }
    }
}

/// Sorts posts into timeline order.
pub fn sort_timeline(posts: &mut [CachedPost]) {
    posts.sort_by(CachedPost::timeline_cmp);
}
