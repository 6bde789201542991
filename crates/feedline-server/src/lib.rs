//! # Feedline Server Library
//!
//! Wiring and lifecycle of a feedline instance: infrastructure selection,
//! service construction, worker pools and the maintenance scheduler.

pub mod app;
pub mod startup;

pub use app::{schedule_maintenance, App, Backends, Stores};
