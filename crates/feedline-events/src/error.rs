//! Event bus error types.

use feedline_core::FeedError;
use thiserror::Error;

/// Result type for event bus operations.
pub type EventResult<T> = Result<T, EventError>;

/// Event-related errors.
#[derive(Debug, Error)]
pub enum EventError {
    /// A handler failed while applying the event.
    #[error("Event handler failed: {0}")]
    Handler(#[from] FeedError),

    /// A handler did not finish within the event timeout.
    #[error("Event timed out after {0} seconds")]
    Timeout(u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// No handler is registered for the event name.
    #[error("No handler registered for event '{0}'")]
    UnknownEvent(String),

    /// Worker pool error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Scheduler error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EventError {
    /// Returns true if delivering the event again may succeed.
    ///
    /// Handler failures follow the feed error taxonomy: validation failures
    /// are final, lock and store failures are retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(e) => e.is_retriable(),
            Self::Timeout(_) | Self::Redis(_) | Self::Pool(_) | Self::Worker(_) => true,
            Self::Serialization(_)
            | Self::UnknownEvent(_)
            | Self::Scheduler(_)
            | Self::Configuration(_) => false,
        }
    }

    /// Returns true if the event should be moved to the dead letter queue
    /// rather than dropped once it is not retried.
    #[must_use]
    pub fn should_dlq(&self) -> bool {
        !matches!(self, Self::Handler(FeedError::Validation(_)))
    }
}

impl From<EventError> for FeedError {
    /// Handler failures unwrap to the original feed error; bus failures are
    /// reported as an external service error.
    fn from(err: EventError) -> Self {
        match err {
            EventError::Handler(inner) => inner,
            other => Self::external("event-bus", other.to_string()),
        }
    }
}
