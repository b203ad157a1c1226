//! Standalone Shu worker process.
//!
//! Wires configuration, the queue backend, in-process record stores, the
//! ingestion and plugin handlers, the worker pool and the feed scheduler.

pub mod demo;
pub mod setup;

pub use setup::{build_backend, App, Stores};
