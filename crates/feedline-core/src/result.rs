//! Result type aliases for feedline.

use crate::FeedError;

/// A specialized `Result` type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// A boxed future returning a `FeedResult`.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = FeedResult<T>> + Send + 'a>>;
