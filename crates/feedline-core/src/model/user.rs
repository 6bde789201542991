//! Cached identity snapshot.

use super::CacheRecord;
use crate::UserId;
use serde::{Deserialize, Serialize};

/// Identity snapshot of a user, eventually consistent with the identity
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub user_id: UserId,
    pub username: String,
    pub active: bool,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl CacheRecord for CachedUser {
    const KIND: &'static str = "user";
    const SCHEMA_VERSION: u16 = 1;
    type Key = UserId;

    fn key(&self) -> UserId {
        self.user_id
    }
}
