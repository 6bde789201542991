//! Scheduled eviction of stale cache entries.

use crate::caches::FeedCaches;
use crate::metrics::names;
use crate::task_pool::TaskPool;
use chrono::{DateTime, Utc};
use feedline_cache::ScanCursor;
use feedline_config::ReclaimerConfig;
use feedline_core::{FeedError, FeedResult, PostId, UserId};
use tracing::{info, instrument, warn};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub evicted: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, evicted: FeedResult<bool>) -> FeedResult<()> {
        match evicted {
            Ok(true) => self.evicted += 1,
            Ok(false) => {}
            Err(e) => {
                self.failed += 1;
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Result of a full reclamation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub users: SweepReport,
    pub posts: SweepReport,
}

/// Sweeps the user and post caches and evicts entries that should no longer
/// be served: inactive users (with their feeds) and posts past retention.
#[derive(Clone)]
pub struct CacheReclaimer {
    caches: FeedCaches,
    maintenance: TaskPool,
    config: ReclaimerConfig,
}

impl CacheReclaimer {
    pub fn new(caches: FeedCaches, maintenance: TaskPool, config: ReclaimerConfig) -> Self {
        Self {
            caches,
            maintenance,
            config,
        }
    }

    /// Sweeps both caches concurrently.
    ///
    /// Both sweeps always run to completion; if either could not page
    /// through its cache the first such error is returned afterwards.
    #[instrument(skip(self))]
    pub async fn reclaim(&self) -> FeedResult<ReclaimReport> {
        let now = Utc::now();

        let users = {
            let this = self.clone();
            self.maintenance.spawn(async move { this.sweep_users().await })
        };
        let posts = {
            let this = self.clone();
            self.maintenance.spawn(async move { this.sweep_posts(now).await })
        };

        let users = users
            .await
            .map_err(|e| FeedError::internal(format!("user sweep aborted: {e}")))?;
        let posts = posts
            .await
            .map_err(|e| FeedError::internal(format!("post sweep aborted: {e}")))?;

        let report = ReclaimReport {
            users: users?,
            posts: posts?,
        };
        info!(
            users_evicted = report.users.evicted,
            posts_evicted = report.posts.evicted,
            failures = report.users.failed + report.posts.failed,
            "Cache reclamation finished"
        );
        Ok(report)
    }

    /// Evicts inactive users and their feeds.
    pub async fn sweep_users(&self) -> FeedResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut cursor = ScanCursor::start();

        loop {
            let page = self.caches.users.scan_page(&cursor, self.config.batch_size).await?;
            report.scanned += page.records.len();

            for user in page.records.iter().filter(|u| !u.active) {
                if let Err(e) = report.record(self.evict_user(user.user_id).await) {
                    warn!(user_id = %user.user_id, error = %e, "Failed to evict inactive user");
                }
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        Ok(report)
    }

    async fn evict_user(&self, user_id: UserId) -> FeedResult<bool> {
        let users = &self.caches.users;
        let removed = users
            .with_lock(user_id, || async move { users.delete(user_id).await })
            .await?;

        let feeds = &self.caches.feeds;
        let feed_removed = feeds
            .with_lock(user_id, || async move { feeds.delete(user_id).await })
            .await?;

        if removed {
            metrics::counter!(names::RECLAIMED_ENTRIES_TOTAL, "kind" => "user").increment(1);
        }
        if feed_removed {
            metrics::counter!(names::RECLAIMED_ENTRIES_TOTAL, "kind" => "feed").increment(1);
        }
        Ok(removed)
    }

    /// Evicts posts published before the retention window.
    pub async fn sweep_posts(&self, now: DateTime<Utc>) -> FeedResult<SweepReport> {
        let cutoff = now - self.config.post_retention();
        let mut report = SweepReport::default();
        let mut cursor = ScanCursor::start();

        loop {
            let page = self.caches.posts.scan_page(&cursor, self.config.batch_size).await?;
            report.scanned += page.records.len();

            for post in page.records.iter().filter(|p| p.published_at < cutoff) {
                if let Err(e) = report.record(self.evict_post(post.post_id).await) {
                    warn!(post_id = %post.post_id, error = %e, "Failed to evict expired post");
                }
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        Ok(report)
    }

    async fn evict_post(&self, post_id: PostId) -> FeedResult<bool> {
        let posts = &self.caches.posts;
        let removed = posts
            .with_lock(post_id, || async move { posts.delete(post_id).await })
            .await?;
        if removed {
            metrics::counter!(names::RECLAIMED_ENTRIES_TOTAL, "kind" => "post").increment(1);
        }
        Ok(removed)
    }
}
