//! Per-user feed entry set and feed pages.

use super::{CacheRecord, CachedPost, CachedUser};
use crate::{PostId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The bounded, ordered set of post ids making up one user's cached timeline.
///
/// Ids are kept newest first. The set never holds duplicates, and inserting
/// at capacity evicts the oldest id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntrySet {
    pub user_id: UserId,
    post_ids: VecDeque<PostId>,
}

impl CacheRecord for FeedEntrySet {
    const KIND: &'static str = "feed";
    const SCHEMA_VERSION: u16 = 1;
    type Key = UserId;

    fn key(&self) -> UserId {
        self.user_id
    }
}

/// Where a cursor sits inside a feed entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPosition {
    /// Entries to skip to move past the cursor, the cursor included.
    pub skip: usize,
    /// Entries left after the cursor.
    pub remaining: usize,
    /// Whether the cursor was found at all.
    pub found: bool,
}

impl FeedPosition {
    const NOT_FOUND: Self = Self {
        skip: 0,
        remaining: 0,
        found: false,
    };
}

impl FeedEntrySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            post_ids: VecDeque::new(),
        }
    }

    /// Builds a set from ids already in timeline order (newest first),
    /// keeping at most `capacity` of them.
    #[must_use]
    pub fn from_ordered<I>(user_id: UserId, ids: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = PostId>,
    {
        let mut post_ids = VecDeque::new();
        for id in ids {
            if post_ids.len() >= capacity {
                break;
            }
            if !post_ids.contains(&id) {
                post_ids.push_back(id);
            }
        }
        Self { user_id, post_ids }
    }

    /// Inserts a post id at the newest end.
    ///
    /// Returns the id evicted to make room, if any. Inserting an id that is
    /// already present changes nothing.
    pub fn insert(&mut self, post_id: PostId, capacity: usize) -> Option<PostId> {
        if capacity == 0 || self.post_ids.contains(&post_id) {
            return None;
        }

        let mut evicted = None;
        while self.post_ids.len() >= capacity {
            evicted = self.post_ids.pop_back();
        }
        self.post_ids.push_front(post_id);
        evicted
    }

    /// Locates `anchor` in the ordered ids.
    #[must_use]
    pub fn locate(&self, anchor: PostId) -> FeedPosition {
        match self.post_ids.iter().position(|id| *id == anchor) {
            Some(index) => {
                let skip = index + 1;
                FeedPosition {
                    skip,
                    remaining: self.post_ids.len() - skip,
                    found: true,
                }
            }
            None => FeedPosition::NOT_FOUND,
        }
    }

    /// The newest `size` ids.
    #[must_use]
    pub fn first_page(&self, size: usize) -> Vec<PostId> {
        self.post_ids.iter().take(size).copied().collect()
    }

    /// Up to `size` ids following a located cursor.
    #[must_use]
    pub fn page_after(&self, position: FeedPosition, size: usize) -> Vec<PostId> {
        if !position.found {
            return Vec::new();
        }
        self.post_ids
            .iter()
            .skip(position.skip)
            .take(size)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, post_id: PostId) -> bool {
        self.post_ids.contains(&post_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.post_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.post_ids.is_empty()
    }

    /// Iterates the ids newest first.
    pub fn ids(&self) -> impl Iterator<Item = PostId> + '_ {
        self.post_ids.iter().copied()
    }
}

/// One page of a news feed together with the identities of its authors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub posts: Vec<CachedPost>,
    pub authors: Vec<CachedUser>,
}

impl FeedPage {
    /// Id of the last post on the page, the cursor for the next page.
    #[must_use]
    pub fn last_post_id(&self) -> Option<PostId> {
        self.posts.last().map(|p| p.post_id)
    }

    #[must_use]
    pub fn post_ids(&self) -> Vec<PostId> {
        self.posts.iter().map(|p| p.post_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[i64]) -> Vec<PostId> {
        raw.iter().copied().map(PostId::new).collect()
    }

    #[test]
    fn test_insert_evicts_oldest_at_capacity() {
        let mut feed = FeedEntrySet::new(UserId::new(1));
        assert_eq!(feed.insert(PostId::new(1), 2), None);
        assert_eq!(feed.insert(PostId::new(2), 2), None);
        assert_eq!(feed.insert(PostId::new(3), 2), Some(PostId::new(1)));

        assert_eq!(feed.ids().collect::<Vec<_>>(), ids(&[3, 2]));
    }

    #[test]
    fn test_insert_existing_id_is_noop() {
        let mut feed = FeedEntrySet::from_ordered(UserId::new(1), ids(&[2, 1]), 2);
        assert_eq!(feed.insert(PostId::new(1), 2), None);
        assert_eq!(feed.ids().collect::<Vec<_>>(), ids(&[2, 1]));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut feed = FeedEntrySet::new(UserId::new(1));
        for id in 0..50 {
            feed.insert(PostId::new(id), 7);
            assert!(feed.len() <= 7);
        }
        assert_eq!(feed.first_page(1), ids(&[49]));
    }

    #[test]
    fn test_from_ordered_dedupes_and_truncates() {
        let feed = FeedEntrySet::from_ordered(UserId::new(1), ids(&[5, 4, 4, 3, 2]), 3);
        assert_eq!(feed.ids().collect::<Vec<_>>(), ids(&[5, 4, 3]));
    }

    #[test]
    fn test_locate_found() {
        let feed = FeedEntrySet::from_ordered(UserId::new(1), ids(&[3, 2, 1]), 10);
        let position = feed.locate(PostId::new(2));

        assert_eq!(
            position,
            FeedPosition {
                skip: 2,
                remaining: 1,
                found: true
            }
        );
        assert_eq!(feed.page_after(position, 2), ids(&[1]));
    }

    #[test]
    fn test_locate_last_entry_has_nothing_remaining() {
        let feed = FeedEntrySet::from_ordered(UserId::new(1), ids(&[3, 2, 1]), 10);
        let position = feed.locate(PostId::new(1));

        assert!(position.found);
        assert_eq!(position.remaining, 0);
        assert!(feed.page_after(position, 5).is_empty());
    }

    #[test]
    fn test_locate_missing() {
        let feed = FeedEntrySet::from_ordered(UserId::new(1), ids(&[3, 2, 1]), 10);
        let position = feed.locate(PostId::new(42));

        assert!(!position.found);
        assert_eq!(position.skip, 0);
        assert_eq!(position.remaining, 0);
        assert!(feed.page_after(position, 5).is_empty());
    }
}
