//! # Feedline Config
//!
//! Configuration management for feedline.
//! Supports layered configuration from files and environment variables,
//! validated up front, with runtime refresh.

mod app_config;
mod events;
mod loader;
mod validation;

pub use app_config::*;
pub use events::*;
pub use loader::*;
pub use validation::*;
