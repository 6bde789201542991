//! MySQL post store implementation.

use super::rows::{limit_arg, PostRow, RecentRow, POST_SELECT, POST_VISIBLE, TIMELINE_ORDER};
use crate::traits::PostStore;
use crate::DatabasePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_core::{CachedPost, FeedResult, KeysetPage, KeysetRequest, PostId, UserId};
use sqlx::{MySql, QueryBuilder};
use std::sync::Arc;
use tracing::debug;

/// MySQL post store.
#[derive(Clone)]
pub struct MySqlPostStore {
    pool: Arc<DatabasePool>,
}

impl MySqlPostStore {
    /// Creates a new MySQL post store.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

/// Appends `(a, b, c)` binding every author id.
fn push_author_list(builder: &mut QueryBuilder<'_, MySql>, author_ids: &[UserId]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in author_ids {
        separated.push_bind(id.into_inner());
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl PostStore for MySqlPostStore {
    async fn newest_by_followees(
        &self,
        followee_ids: &[UserId],
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>> {
        if followee_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        debug!(followees = followee_ids.len(), limit, "Loading newest posts by followees");

        let mut builder = QueryBuilder::<MySql>::new(POST_SELECT);
        builder.push(" FROM post p WHERE ");
        builder.push(POST_VISIBLE);
        builder.push(" AND p.author_id IN ");
        push_author_list(&mut builder, followee_ids);
        builder.push(TIMELINE_ORDER);
        builder.push(" LIMIT ");
        builder.push_bind(limit_arg(limit));

        let rows = builder
            .build_query_as::<PostRow>()
            .fetch_all(self.pool.inner())
            .await?;

        Ok(rows.into_iter().map(CachedPost::from).collect())
    }

    async fn newest_by_followees_after(
        &self,
        followee_ids: &[UserId],
        cursor: PostId,
        limit: usize,
    ) -> FeedResult<Vec<CachedPost>> {
        if followee_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        debug!(cursor = %cursor, limit, "Loading posts by followees after cursor");

        let mut builder = QueryBuilder::<MySql>::new(POST_SELECT);
        builder.push(" FROM post p JOIN post cur ON cur.id = ");
        builder.push_bind(cursor.into_inner());
        builder.push(" WHERE ");
        builder.push(POST_VISIBLE);
        builder.push(" AND p.author_id IN ");
        push_author_list(&mut builder, followee_ids);
        builder.push(
            " AND (p.published_at < cur.published_at \
               OR (p.published_at = cur.published_at AND p.id < cur.id))",
        );
        builder.push(TIMELINE_ORDER);
        builder.push(" LIMIT ");
        builder.push_bind(limit_arg(limit));

        let rows = builder
            .build_query_as::<PostRow>()
            .fetch_all(self.pool.inner())
            .await?;

        Ok(rows.into_iter().map(CachedPost::from).collect())
    }

    async fn exists(&self, post_id: PostId) -> FeedResult<bool> {
        let result: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM post p WHERE p.id = ? AND p.published = TRUE AND p.deleted = FALSE LIMIT 1",
        )
        .bind(post_id.into_inner())
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(result.is_some())
    }

    async fn belongs_to_followees(
        &self,
        followee_ids: &[UserId],
        post_id: PostId,
    ) -> FeedResult<bool> {
        if followee_ids.is_empty() {
            return Ok(false);
        }

        let mut builder = QueryBuilder::<MySql>::new("SELECT 1 FROM post p WHERE p.id = ");
        builder.push_bind(post_id.into_inner());
        builder.push(" AND ");
        builder.push(POST_VISIBLE);
        builder.push(" AND p.author_id IN ");
        push_author_list(&mut builder, followee_ids);
        builder.push(" LIMIT 1");

        let result: Option<i64> = builder
            .build_query_scalar::<i64>()
            .fetch_optional(self.pool.inner())
            .await?;

        Ok(result.is_some())
    }

    async fn by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<CachedPost>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = post_ids.len(), "Loading posts by id");

        let mut builder = QueryBuilder::<MySql>::new(POST_SELECT);
        builder.push(" FROM post p WHERE ");
        builder.push(POST_VISIBLE);
        builder.push(" AND p.id IN (");
        let mut separated = builder.separated(", ");
        for id in post_ids {
            separated.push_bind(id.into_inner());
        }
        separated.push_unseparated(")");
        builder.push(TIMELINE_ORDER);

        let rows = builder
            .build_query_as::<PostRow>()
            .fetch_all(self.pool.inner())
            .await?;

        Ok(rows.into_iter().map(CachedPost::from).collect())
    }

    async fn recent_post_ids(
        &self,
        since: DateTime<Utc>,
        request: KeysetRequest,
    ) -> FeedResult<KeysetPage<PostId>> {
        debug!(since = %since, after = ?request.after, size = request.size, "Listing recently published posts");

        let mut builder = QueryBuilder::<MySql>::new("SELECT p.id, p.published_at FROM post p WHERE ");
        builder.push(POST_VISIBLE);
        builder.push(" AND p.published_at >= ");
        builder.push_bind(since);
        if let Some(after) = request.after {
            builder.push(" AND (p.published_at < ");
            builder.push_bind(after.published_at);
            builder.push(" OR (p.published_at = ");
            builder.push_bind(after.published_at);
            builder.push(" AND p.id < ");
            builder.push_bind(after.post_id.into_inner());
            builder.push("))");
        }
        builder.push(TIMELINE_ORDER);
        builder.push(" LIMIT ");
        builder.push_bind(limit_arg(request.limit()));

        let rows = builder
            .build_query_as::<RecentRow>()
            .fetch_all(self.pool.inner())
            .await?;

        Ok(KeysetPage::from_keyed(
            rows.into_iter().map(RecentRow::keyed).collect(),
            request,
        ))
    }
}
