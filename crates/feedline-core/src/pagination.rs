//! Keyset pagination for store-backed timeline listings.
//!
//! Listings are ordered newest first by `(published_at, id)`. A page ends
//! with the key of its last row, and the next page starts strictly below it,
//! so rows published while a listing is walked never shift later pages.

use crate::id::PostId;
use crate::model::CachedPost;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of one row in the timeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineKey {
    pub published_at: DateTime<Utc>,
    pub post_id: PostId,
}

impl TimelineKey {
    #[must_use]
    pub const fn new(published_at: DateTime<Utc>, post_id: PostId) -> Self {
        Self {
            published_at,
            post_id,
        }
    }

    #[must_use]
    pub fn of(post: &CachedPost) -> Self {
        Self::new(post.published_at, post.post_id)
    }

    /// True when `other` comes after this key in the timeline order.
    #[must_use]
    pub fn precedes(&self, other: &Self) -> bool {
        other.published_at < self.published_at
            || (other.published_at == self.published_at && other.post_id < self.post_id)
    }
}

/// A request for the rows below an optional key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetRequest {
    /// Rows strictly below this key; `None` starts from the newest row.
    pub after: Option<TimelineKey>,
    /// The number of rows per page.
    pub size: usize,
}

impl KeysetRequest {
    /// The default page size.
    pub const DEFAULT_SIZE: usize = 100;
    /// The maximum allowed page size.
    pub const MAX_SIZE: usize = 1000;

    /// Creates a request for the newest page with the given size.
    #[must_use]
    pub fn first(size: usize) -> Self {
        Self {
            after: None,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// Returns the request continuing below `key`.
    #[must_use]
    pub fn below(&self, key: TimelineKey) -> Self {
        Self {
            after: Some(key),
            size: self.size,
        }
    }

    /// Returns the limit for database queries.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.size
    }

    /// True when `key` belongs to the requested page's range.
    #[must_use]
    pub fn admits(&self, key: &TimelineKey) -> bool {
        self.after.map_or(true, |after| after.precedes(key))
    }
}

impl Default for KeysetRequest {
    fn default() -> Self {
        Self::first(Self::DEFAULT_SIZE)
    }
}

/// A page of results and the request for the page after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetPage<T> {
    /// The items on this page.
    pub content: Vec<T>,
    /// Absent when this page is the last one.
    pub next: Option<KeysetRequest>,
}

impl<T> KeysetPage<T> {
    /// Builds a page from rows in timeline order with their keys.
    ///
    /// A page filled to the requested size is assumed to have a successor.
    #[must_use]
    pub fn from_keyed(rows: Vec<(T, TimelineKey)>, request: KeysetRequest) -> Self {
        let next = if rows.len() >= request.size {
            rows.last().map(|(_, key)| request.below(*key))
        } else {
            None
        };
        Self {
            content: rows.into_iter().map(|(item, _)| item).collect(),
            next,
        }
    }

    /// Creates an empty, final page.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            content: Vec::new(),
            next: None,
        }
    }

    /// Returns true if this page has content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Returns true if there is no page after this one.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}
