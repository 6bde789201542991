//! Cache key builders for consistent key naming.

use std::fmt::Display;

/// Builds every key feedline writes to the cache store.
///
/// Entities live under `{prefix}:{kind}:{id}`, their locks under
/// `{prefix}:lock:{kind}:{id}` and event claims under
/// `{prefix}:dedup:{scope}:{event_id}`.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of a cached entity.
    #[must_use]
    pub fn entity(&self, kind: &str, id: impl Display) -> String {
        format!("{}:{}:{}", self.prefix, kind, id)
    }

    /// Key of the lock guarding a cached entity.
    #[must_use]
    pub fn lock(&self, kind: &str, id: impl Display) -> String {
        format!("{}:lock:{}:{}", self.prefix, kind, id)
    }

    /// Pattern matching every entity of a kind, but not their locks.
    #[must_use]
    pub fn pattern(&self, kind: &str) -> String {
        format!("{}:{}:*", self.prefix, kind)
    }

    /// Key recording that an event was handled.
    #[must_use]
    pub fn dedup(&self, scope: &str, event_id: &str) -> String {
        format!("{}:dedup:{}:{}", self.prefix, scope, event_id)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("feedline")
    }
}
