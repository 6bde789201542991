//! Cache record types.
//!
//! Everything the cache stores is one of a closed set of record types. Each
//! is written inside a small envelope carrying its kind and schema version so
//! that a reader never has to guess what a stored value is.

mod feed;
mod post;
mod user;

pub use feed::*;
pub use post::*;
pub use user::*;

use crate::{FeedError, FeedResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::CachedPost {}
    impl Sealed for super::CachedUser {}
    impl Sealed for super::FeedEntrySet {}
}

/// A value that can be stored in an entity cache.
///
/// This trait is sealed: the set of cacheable records is fixed.
pub trait CacheRecord:
    sealed::Sealed + Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Key segment naming the record type, e.g. `post`.
    const KIND: &'static str;

    /// Bumped whenever the serialized shape changes.
    const SCHEMA_VERSION: u16;

    /// Identifier of a record within its kind.
    type Key: Copy + Ord + Hash + Display + Debug + Send + Sync + 'static;

    /// Returns the identifier of this record.
    fn key(&self) -> Self::Key;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema_version: u16,
    kind: &'a str,
    record: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    schema_version: u16,
    kind: String,
    record: serde_json::Value,
}

/// Serializes a record into its stored envelope form.
pub fn encode_record<T: CacheRecord>(record: &T) -> FeedResult<String> {
    let envelope = EnvelopeRef {
        schema_version: T::SCHEMA_VERSION,
        kind: T::KIND,
        record,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decodes a stored envelope.
///
/// Returns `Ok(None)` when the envelope was written for another kind or
/// another schema version; such entries are treated as cache misses.
pub fn decode_record<T: CacheRecord>(raw: &str) -> FeedResult<Option<T>> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;

    if envelope.kind != T::KIND || envelope.schema_version != T::SCHEMA_VERSION {
        return Ok(None);
    }

    serde_json::from_value(envelope.record)
        .map(Some)
        .map_err(|e| FeedError::Serialization(format!("{} record: {e}", T::KIND)))
}
