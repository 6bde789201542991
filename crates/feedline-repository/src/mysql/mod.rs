//! MySQL store implementations.

mod comment_store;
mod post_store;
mod rows;

pub use comment_store::MySqlCommentStore;
pub use post_store::MySqlPostStore;
