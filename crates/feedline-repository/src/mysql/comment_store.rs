//! MySQL comment store implementation.

use super::rows::{limit_arg, CommentRow};
use crate::traits::CommentStore;
use crate::DatabasePool;
use async_trait::async_trait;
use feedline_core::{CachedComment, FeedResult, PostId};
use std::sync::Arc;
use tracing::debug;

/// MySQL comment store.
#[derive(Clone)]
pub struct MySqlCommentStore {
    pool: Arc<DatabasePool>,
}

impl MySqlCommentStore {
    /// Creates a new MySQL comment store.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentStore for MySqlCommentStore {
    async fn latest_by_post(
        &self,
        post_id: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedComment>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        debug!(post_id = %post_id, limit, "Loading latest comments");

        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.author_id, c.post_id, c.content,
                   (SELECT COUNT(*) FROM likes l WHERE l.comment_id = c.id) AS likes_count,
                   c.created_at, c.updated_at
            FROM comment c
            WHERE c.post_id = ?
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT ?
            "#,
        )
        .bind(post_id.into_inner())
        .bind(limit_arg(limit))
        .fetch_all(self.pool.inner())
        .await?;

        Ok(rows.into_iter().map(CachedComment::from).collect())
    }
}
