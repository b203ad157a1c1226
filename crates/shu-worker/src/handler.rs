//! Job handler trait and registry.
//!
//! Each workload is served by one handler. The worker resolves a dequeued job's
//! workload and calls `handle`; once a job is given up on it calls
//! `on_dead_letter` so the handler can flip its domain record to a failed state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use shu_core::models::{Job, WorkloadType};
use shu_core::JobError;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;

    /// Called once when the job is dead-lettered.
    async fn on_dead_letter(&self, _job: &Job, _error: &JobError) {}
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkloadType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a workload, replacing any previous one.
    pub fn register(&mut self, workload: WorkloadType, handler: Arc<dyn JobHandler>) -> &mut Self {
        if self.handlers.insert(workload, handler).is_some() {
            tracing::warn!(workload = %workload, "Replacing previously registered job handler");
        }
        self
    }

    pub fn get(&self, workload: WorkloadType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&workload).cloned()
    }

    pub fn workloads(&self) -> Vec<WorkloadType> {
        let mut workloads: Vec<_> = self.handlers.keys().copied().collect();
        workloads.sort();
        workloads
    }
}
