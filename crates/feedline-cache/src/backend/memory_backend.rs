//! In-process cache backend.

use super::{CacheBackend, ScanBatch, SCAN_START};
use async_trait::async_trait;
use feedline_core::FeedResult;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache backend for local development and tests.
///
/// Entries expire lazily on access. Scan cursors are the last key returned,
/// so a scan walks the keys in lexical order. Patterns support a single
/// trailing `*`.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryCacheBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> FeedResult<Option<String>> {
        Ok(self.read(key))
    }

    async fn get_many_raw(&self, keys: &[String]) -> FeedResult<Vec<Option<String>>> {
        Ok(keys.iter().map(|k| self.read(k)).collect())
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> FeedResult<()> {
        self.write(key, value, ttl);
        Ok(())
    }

    async fn set_many_raw(&self, entries: &[(String, String)], ttl: Duration) -> FeedResult<()> {
        for (key, value) in entries {
            self.write(key, value, ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> FeedResult<bool> {
        let removed = self.entries.lock().remove(key);
        Ok(removed.is_some_and(|e| e.expires_at > Instant::now()))
    }

    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> FeedResult<ScanBatch> {
        let now = Instant::now();
        let entries = self.entries.lock();

        let lower = if cursor == SCAN_START {
            Bound::Unbounded
        } else {
            Bound::Excluded(cursor.to_string())
        };

        let mut batch = Vec::new();
        let mut last_key = None;
        let mut exhausted = true;

        for (key, entry) in entries.range((lower, Bound::Unbounded)) {
            if batch.len() >= count.max(1) {
                exhausted = false;
                break;
            }
            last_key = Some(key.clone());
            if entry.expires_at > now && matches(pattern, key) {
                batch.push((key.clone(), entry.value.clone()));
            }
        }

        Ok(ScanBatch {
            entries: batch,
            next_cursor: if exhausted { None } else { last_key },
        })
    }
}
