//! # Feedline Core
//!
//! Core types and error definitions shared by every feedline crate:
//! typed ids, the cache record types, the request context and the
//! unified error type.

pub mod context;
pub mod error;
pub mod id;
pub mod model;
pub mod pagination;
pub mod result;
pub mod telemetry;

pub use context::*;
pub use error::*;
pub use id::*;
pub use model::*;
pub use pagination::*;
pub use result::*;
