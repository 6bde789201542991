//! HTTP collaborator clients.

mod user_directory;

pub use user_directory::HttpUserDirectory;
