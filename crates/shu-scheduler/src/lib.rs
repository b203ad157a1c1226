//! Shu plugin feed scheduler
//!
//! Turns due [`shu_core::models::PluginFeed`]s into queued plugin executions
//! and sweeps executions whose heartbeat stopped.

pub mod config;
pub mod service;

pub use config::SchedulerConfig;
pub use service::{PluginsSchedulerService, SchedulerTickReport, STALE_ERROR};
