//! # Feedline Repository
//!
//! Sources of truth behind the cache:
//!
//! ```text
//! feedline-service
//!   ↓  Arc<dyn PostStore> / Arc<dyn CommentStore> / Arc<dyn UserDirectory>
//! MySqlPostStore, MySqlCommentStore   (MySQL / SQLx)
//! HttpUserDirectory                   (identity service / reqwest)
//! ```

pub mod http;
pub mod mysql;
pub mod pool;
pub mod traits;

pub use http::HttpUserDirectory;
pub use mysql::{MySqlCommentStore, MySqlPostStore};
pub use pool::*;
pub use traits::*;
