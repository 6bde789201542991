//! Request-scoped context.

use crate::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity a feed request is served for.
///
/// Passed explicitly into every feed operation; nothing about the caller is
/// kept in task-local or global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlates log lines of a single request.
    pub request_id: Uuid,
    /// The user whose timeline is being read.
    pub user_id: UserId,
}

impl RequestContext {
    /// Creates a context with a fresh request id.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            user_id,
        }
    }

    /// Creates a context that continues an existing request.
    #[must_use]
    pub const fn with_request_id(request_id: Uuid, user_id: UserId) -> Self {
        Self { request_id, user_id }
    }
}
