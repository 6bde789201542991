//! Unified error type for the feed pipeline.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for every layer of feedline.
///
/// The variants follow the failure taxonomy of the feed pipeline:
/// validation failures are surfaced to the caller and never retried,
/// lock failures are surfaced to the immediate caller of a cache operation,
/// and store failures are fatal for the operation that triggered them.
#[derive(Error, Debug)]
pub enum FeedError {
    // ============ Caller Errors ============
    /// The request references an unknown user or post, or a post outside the
    /// caller's timeline.
    #[error("Validation error: {0}")]
    Validation(String),

    // ============ Coordination Errors ============
    /// A per-key lock could not be acquired within its wait bound, or the
    /// guarded section outlived its hold bound.
    #[error("Lock failure on '{key}': {reason}")]
    LockFailure { key: String, reason: String },

    // ============ Infrastructure Errors ============
    /// Persistent store error.
    #[error("Store error: {0}")]
    Store(String),

    /// Remote collaborator error (identity service).
    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// Redis/Cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Encoding or decoding of a cache record or message failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FeedError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::LockFailure { .. } => "LOCK_FAILURE",
            Self::Store(_) => "STORE_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a lock failure for the given key.
    #[must_use]
    pub fn lock_failure<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::LockFailure {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a store error.
    #[must_use]
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store(message.into())
    }

    /// Creates an external service error.
    #[must_use]
    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a cache error.
    #[must_use]
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is a validation failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Checks if this error is a lock failure.
    #[must_use]
    pub const fn is_lock_failure(&self) -> bool {
        matches!(self, Self::LockFailure { .. })
    }

    /// Checks if this error came from a source of truth (database or identity service).
    #[must_use]
    pub const fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ExternalService { .. })
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockFailure { .. }
                | Self::Store(_)
                | Self::ExternalService { .. }
                | Self::Cache(_)
                | Self::Timeout(_)
        )
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for FeedError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
