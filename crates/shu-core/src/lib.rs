//! Shu Core Library
//!
//! This crate provides the domain models, job error types and configuration
//! shared by the queue, worker, ingestion, plugin and scheduler crates.

pub mod config;
pub mod models;
pub mod task_error;

// Re-export commonly used types
pub use config::{
    Config, ConfigError, IngestionSettings, LogFormat, PluginSettings, QueueBackendKind,
    QueueSettings, SchedulerSettings, TelemetrySettings, WorkerSettings,
};
pub use task_error::{JobError, JobErrorKind, JobResultExt};
