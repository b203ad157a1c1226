//! Workload routing: which physical queue a logical workload lands on.

use std::collections::HashMap;

use serde_json::Value;

use shu_core::models::{Job, WorkloadType};
use shu_core::QueueSettings;

use crate::backend::{QueueBackend, QueueResult};

/// Payload key carrying the workload, so workers sharing a queue can dispatch.
pub const WORKLOAD_PAYLOAD_KEY: &str = "workload_type";

const DEAD_LETTER_SUFFIX: &str = ":dead";

#[derive(Debug, Clone)]
pub struct WorkloadRouting {
    routes: HashMap<WorkloadType, String>,
    max_attempts: u32,
    visibility_timeout_secs: u64,
}

impl WorkloadRouting {
    /// Default routes: `"{prefix}:{workload}"` for every workload.
    pub fn new(prefix: &str) -> Self {
        let routes = WorkloadType::all()
            .iter()
            .map(|w| (*w, format!("{}:{}", prefix, w)))
            .collect();
        Self {
            routes,
            max_attempts: shu_core::models::DEFAULT_MAX_ATTEMPTS,
            visibility_timeout_secs: shu_core::models::DEFAULT_VISIBILITY_TIMEOUT_SECS,
        }
    }

    pub fn from_config(settings: &QueueSettings) -> Self {
        let mut routing = Self::new(&settings.prefix);
        for (workload, queue) in &settings.routes {
            routing = routing.with_override(*workload, queue.clone());
        }
        routing.max_attempts = settings.max_attempts.max(1);
        routing.visibility_timeout_secs = settings.visibility_timeout_secs.max(1);
        routing
    }

    /// Pin a workload to a specific queue. Several workloads may share one.
    pub fn with_override(mut self, workload: WorkloadType, queue: impl Into<String>) -> Self {
        self.routes.insert(workload, queue.into());
        self
    }

    pub fn queue_for(&self, workload: WorkloadType) -> &str {
        // Every workload is seeded in `new`, so the map is total.
        self.routes
            .get(&workload)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Queues serving `workloads`, deduplicated, in first-seen order.
    pub fn queues_for(&self, workloads: &[WorkloadType]) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for workload in workloads {
            let queue = self.queue_for(*workload);
            if !queues.iter().any(|q| q == queue) {
                queues.push(queue.to_string());
            }
        }
        queues
    }

    pub fn workloads_for_queue(&self, queue: &str) -> Vec<WorkloadType> {
        let mut workloads: Vec<WorkloadType> = self
            .routes
            .iter()
            .filter(|(_, q)| q.as_str() == queue)
            .map(|(w, _)| *w)
            .collect();
        workloads.sort();
        workloads
    }

    pub fn dead_letter_queue(queue: &str) -> String {
        format!("{}{}", queue, DEAD_LETTER_SUFFIX)
    }

    /// Build a job for `workload` on its routed queue with the payload tagged.
    pub fn job_for(&self, workload: WorkloadType, payload: Value) -> Job {
        Job::new(self.queue_for(workload), tag_payload(workload, payload))
            .with_max_attempts(self.max_attempts)
            .with_visibility_timeout(std::time::Duration::from_secs(
                self.visibility_timeout_secs,
            ))
    }

    /// Workload a job belongs to: the payload tag first, then the reverse route
    /// when exactly one workload maps to the job's queue.
    pub fn workload_of(&self, job: &Job) -> Option<WorkloadType> {
        if let Some(tag) = job.payload.get(WORKLOAD_PAYLOAD_KEY).and_then(Value::as_str) {
            return tag.parse().ok();
        }
        match self.workloads_for_queue(&job.queue_name).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

impl Default for WorkloadRouting {
    fn default() -> Self {
        Self::new("shu")
    }
}

/// Insert the workload tag into an object payload. Non-object payloads are
/// wrapped as `{"workload_type": ..., "data": payload}`.
pub fn tag_payload(workload: WorkloadType, payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert(
                WORKLOAD_PAYLOAD_KEY.to_string(),
                Value::String(workload.to_string()),
            );
            Value::Object(map)
        }
        other => serde_json::json!({
            WORKLOAD_PAYLOAD_KEY: workload.to_string(),
            "data": other,
        }),
    }
}

/// Tag and enqueue a payload on the queue routed for `workload`.
#[tracing::instrument(skip(backend, routing, payload), fields(queue = routing.queue_for(workload)))]
pub async fn enqueue_workload(
    backend: &dyn QueueBackend,
    routing: &WorkloadRouting,
    workload: WorkloadType,
    payload: Value,
) -> QueueResult<Job> {
    let job = routing.job_for(workload, payload);
    let job = backend.enqueue(job).await?;
    tracing::debug!(job.id = %job.id, workload = %workload, "Workload enqueued");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_routes() {
        let routing = WorkloadRouting::default();
        assert_eq!(
            routing.queue_for(WorkloadType::IngestionOcr),
            "shu:ingestion_ocr"
        );
        assert_eq!(
            routing.queue_for(WorkloadType::PluginExecution),
            "shu:plugin_execution"
        );
    }

    #[test]
    fn test_overrides_share_queue() {
        let routing = WorkloadRouting::new("app")
            .with_override(WorkloadType::IngestionOcr, "ingest")
            .with_override(WorkloadType::IngestionEmbed, "ingest");

        let queues = routing.queues_for(&[
            WorkloadType::IngestionOcr,
            WorkloadType::IngestionEmbed,
            WorkloadType::Profiling,
        ]);
        assert_eq!(queues, vec!["ingest".to_string(), "app:profiling".to_string()]);
        assert_eq!(
            routing.workloads_for_queue("ingest"),
            vec![WorkloadType::IngestionOcr, WorkloadType::IngestionEmbed]
        );
    }

    #[test]
    fn test_from_config() {
        let mut settings = QueueSettings::default();
        settings.prefix = "tenant1".to_string();
        settings.max_attempts = 7;
        settings
            .routes
            .insert(WorkloadType::Profiling, "slow".to_string());

        let routing = WorkloadRouting::from_config(&settings);
        assert_eq!(routing.queue_for(WorkloadType::Profiling), "slow");
        assert_eq!(
            routing.queue_for(WorkloadType::Maintenance),
            "tenant1:maintenance"
        );
        let job = routing.job_for(WorkloadType::Profiling, json!({}));
        assert_eq!(job.max_attempts, 7);
        assert_eq!(job.queue_name, "slow");
    }

    #[test]
    fn test_workload_of_prefers_payload_tag() {
        let routing = WorkloadRouting::default()
            .with_override(WorkloadType::IngestionOcr, "shared")
            .with_override(WorkloadType::IngestionEmbed, "shared");

        let tagged = routing.job_for(WorkloadType::IngestionEmbed, json!({"document_id": 1}));
        assert_eq!(tagged.queue_name, "shared");
        assert_eq!(
            routing.workload_of(&tagged),
            Some(WorkloadType::IngestionEmbed)
        );

        // Untagged job on a shared queue is ambiguous.
        let untagged = Job::new("shared", json!({}));
        assert_eq!(routing.workload_of(&untagged), None);

        // Untagged job on a dedicated queue resolves by reverse lookup.
        let dedicated = Job::new("shu:profiling", json!({}));
        assert_eq!(
            routing.workload_of(&dedicated),
            Some(WorkloadType::Profiling)
        );
    }

    #[test]
    fn test_tag_non_object_payload() {
        let tagged = tag_payload(WorkloadType::Maintenance, json!([1, 2]));
        assert_eq!(tagged["workload_type"], "maintenance");
        assert_eq!(tagged["data"], json!([1, 2]));
    }

    #[test]
    fn test_dead_letter_queue_name() {
        assert_eq!(
            WorkloadRouting::dead_letter_queue("shu:profiling"),
            "shu:profiling:dead"
        );
    }
}
