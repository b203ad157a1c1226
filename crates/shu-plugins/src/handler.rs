//! Job handler for the `plugin_execution` workload.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use shu_core::models::{Job, PluginExecution, PluginExecutionPayload};
use shu_core::{JobError, JobResultExt};
use shu_db::PluginExecutionRepository;
use shu_worker::JobHandler;

use crate::error::PluginError;
use crate::executor::{ExecutionOutcome, ExecutionRequest, PluginExecutor};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the plugin execution a job points at and records the outcome.
///
/// The execution record mirrors the job: `Running` while a worker holds it,
/// back to `Pending` when a retry is coming, `Completed` or `Failed` at the end.
#[derive(Clone)]
pub struct PluginExecutionHandler {
    executor: Arc<PluginExecutor>,
    executions: Arc<dyn PluginExecutionRepository>,
    heartbeat_interval: Duration,
}

impl PluginExecutionHandler {
    pub fn new(executor: Arc<PluginExecutor>, executions: Arc<dyn PluginExecutionRepository>) -> Self {
        Self {
            executor,
            executions,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Runs the plugin while recording a heartbeat on the execution record.
    /// The ticker lives inside this future, so dropping the handler (worker
    /// timeout or abort) stops the heartbeat with it.
    async fn execute_with_heartbeat(
        &self,
        execution: &PluginExecution,
    ) -> Result<ExecutionOutcome, PluginError> {
        let run = self.executor.execute(ExecutionRequest::from_execution(execution));
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.executions.touch_heartbeat(execution.id, Utc::now()).await {
                        tracing::warn!(execution.id = %execution.id, error = %e, "Failed to record execution heartbeat");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for PluginExecutionHandler {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, execution.id = tracing::field::Empty, plugin = tracing::field::Empty))]
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: PluginExecutionPayload = job
            .try_payload_as()
            .unrecoverable()?;
        tracing::Span::current().record("execution.id", payload.execution_id.to_string());

        let execution = self
            .executions
            .get(payload.execution_id)
            .await
            .map_err(JobError::recoverable)?
            .ok_or_else(|| {
                JobError::unrecoverable(anyhow::anyhow!(
                    "Plugin execution {} not found",
                    payload.execution_id
                ))
            })?;
        tracing::Span::current().record("plugin", execution.plugin_name.as_str());

        if execution.status.is_terminal() {
            tracing::info!(status = %execution.status, "Execution already finished, skipping redelivery");
            return Ok(());
        }

        let execution = self
            .executions
            .mark_running(execution.id, Utc::now())
            .await
            .map_err(JobError::recoverable)?;

        let result = self.execute_with_heartbeat(&execution).await;

        match result {
            Ok(outcome) => {
                self.executions
                    .mark_completed(execution.id, outcome.data, Utc::now())
                    .await
                    .map_err(JobError::recoverable)?;
                tracing::info!(
                    duration_ms = outcome.duration.as_millis() as u64,
                    "Plugin execution completed"
                );
                Ok(())
            }
            Err(e) if e.is_recoverable() && job.can_retry() => {
                let message = e.to_string();
                tracing::warn!(error = %message, attempts = job.attempts, "Plugin execution failed, will retry");
                if let Err(db_err) = self
                    .executions
                    .reset_pending(execution.id, Some(message))
                    .await
                {
                    tracing::error!(error = %db_err, "Failed to reset execution to pending");
                }
                Err(e.into())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "Plugin execution failed");
                if let Err(db_err) = self
                    .executions
                    .mark_failed(execution.id, message, Utc::now())
                    .await
                {
                    tracing::error!(error = %db_err, "Failed to mark execution as failed");
                }
                Err(e.into())
            }
        }
    }

    /// Covers give-ups the handler never saw, such as worker timeouts and panics.
    async fn on_dead_letter(&self, job: &Job, error: &JobError) {
        let Some(payload) = job.payload_as::<PluginExecutionPayload>() else {
            return;
        };
        match self.executions.get(payload.execution_id).await {
            Ok(Some(execution)) if !execution.status.is_terminal() => {
                if let Err(e) = self
                    .executions
                    .mark_failed(execution.id, error.to_string(), Utc::now())
                    .await
                {
                    tracing::error!(execution.id = %execution.id, error = %e, "Failed to mark execution as failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(execution.id = %payload.execution_id, error = %e, "Failed to load execution")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::manifest::{OperationSpec, PluginManifest};
    use crate::plugin::PluginOutput;
    use crate::test_helpers::{echo_plugin, test_executor, FnPlugin};
    use serde_json::json;
    use shu_core::models::PluginExecutionStatus;
    use shu_db::InMemoryPluginExecutionRepository;
    use uuid::Uuid;

    async fn setup(plugin: FnPlugin) -> (PluginExecutionHandler, InMemoryPluginExecutionRepository) {
        let executor = test_executor(ExecutorConfig::default());
        executor.registry().register(Arc::new(plugin)).await.unwrap();
        let repo = InMemoryPluginExecutionRepository::new();
        let handler = PluginExecutionHandler::new(Arc::new(executor), Arc::new(repo.clone()));
        (handler, repo)
    }

    async fn job_for(repo: &InMemoryPluginExecutionRepository, execution: PluginExecution, max_attempts: u32) -> Job {
        let execution = repo.create(execution).await.unwrap();
        let payload = PluginExecutionPayload {
            execution_id: execution.id,
        };
        let mut job = Job::new("shu:plugin_execution", Job::payload_from(&payload).unwrap())
            .with_max_attempts(max_attempts);
        job.attempts = 1;
        job
    }

    #[tokio::test]
    async fn test_completes_execution() {
        let (handler, repo) = setup(echo_plugin()).await;
        let execution = PluginExecution::new("echo", "echo", json!({"message": "hi"}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;

        handler.handle(&job).await.unwrap();

        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PluginExecutionStatus::Completed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.result.unwrap()["echo"]["message"], "hi");
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_execution_is_skipped() {
        let plugin = echo_plugin();
        let (handler, repo) = setup(plugin.clone()).await;
        let mut execution = PluginExecution::new("echo", "echo", json!({"message": "hi"}), Uuid::new_v4());
        execution.status = PluginExecutionStatus::Completed;
        let job = job_for(&repo, execution, 3).await;

        handler.handle(&job).await.unwrap();
        assert_eq!(plugin.calls(), 0);
    }

    #[tokio::test]
    async fn test_recoverable_failure_resets_to_pending() {
        let manifest = PluginManifest::new("flaky", "1.0.0").with_operation(OperationSpec::new("sync"));
        let plugin = FnPlugin::new(manifest, |_| Err(PluginError::Execution("503 from provider".into())));
        let (handler, repo) = setup(plugin).await;
        let execution = PluginExecution::new("flaky", "sync", json!({}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;

        let err = handler.handle(&job).await.unwrap_err();
        assert!(err.is_recoverable());
        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PluginExecutionStatus::Pending);
        assert!(stored.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_last_attempt_marks_failed() {
        let manifest = PluginManifest::new("flaky", "1.0.0").with_operation(OperationSpec::new("sync"));
        let plugin = FnPlugin::new(manifest, |_| Err(PluginError::Execution("503".into())));
        let (handler, repo) = setup(plugin).await;
        let execution = PluginExecution::new("flaky", "sync", json!({}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 1).await;

        assert!(handler.handle(&job).await.is_err());
        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PluginExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_marks_failed() {
        let (handler, repo) = setup(echo_plugin()).await;
        let execution = PluginExecution::new("echo", "echo", json!({"message": 5}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;

        let err = handler.handle(&job).await.unwrap_err();
        assert!(!err.is_recoverable());
        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PluginExecutionStatus::Failed);
        assert!(stored.error.unwrap().contains("Invalid input"));
    }

    #[tokio::test]
    async fn test_missing_execution_is_unrecoverable() {
        let (handler, _repo) = setup(echo_plugin()).await;
        let payload = PluginExecutionPayload {
            execution_id: Uuid::new_v4(),
        };
        let job = Job::new("shu:plugin_execution", Job::payload_from(&payload).unwrap());
        assert!(!handler.handle(&job).await.unwrap_err().is_recoverable());

        let garbage = Job::new("shu:plugin_execution", json!({"nope": true}));
        assert!(!handler.handle(&garbage).await.unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_heartbeat_is_recorded_during_long_runs() {
        let manifest = PluginManifest::new("slow", "1.0.0").with_operation(OperationSpec::new("run"));
        let plugin = FnPlugin::with_delay(manifest, Duration::from_millis(200), |_| {
            Ok(PluginOutput::new(json!({})))
        });
        let (handler, repo) = setup(plugin).await;
        let handler = handler.with_heartbeat_interval(Duration::from_millis(20));
        let execution = PluginExecution::new("slow", "run", json!({}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;

        handler.handle(&job).await.unwrap();
        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert!(stored.heartbeat_at.unwrap() > stored.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_aborted_run_stops_heartbeat() {
        let manifest = PluginManifest::new("stuck", "1.0.0").with_operation(OperationSpec::new("run"));
        let plugin = FnPlugin::with_delay(manifest, Duration::from_secs(30), |_| {
            Ok(PluginOutput::new(json!({})))
        });
        let (handler, repo) = setup(plugin).await;
        let handler = Arc::new(handler.with_heartbeat_interval(Duration::from_millis(20)));
        let execution = PluginExecution::new("stuck", "run", json!({}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;

        let run = {
            let handler = handler.clone();
            let job = job.clone();
            tokio::spawn(async move { handler.handle(&job).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());
        handler.on_dead_letter(&job, &JobError::timeout(1)).await;

        let after_abort = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(after_abort.status, PluginExecutionStatus::Failed);
        assert!(after_abort.heartbeat_at.unwrap() > after_abort.started_at.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let later = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(later.heartbeat_at, after_abort.heartbeat_at);
    }

    #[tokio::test]
    async fn test_dead_letter_marks_running_execution_failed() {
        let (handler, repo) = setup(echo_plugin()).await;
        let execution = PluginExecution::new("echo", "echo", json!({}), Uuid::new_v4());
        let job = job_for(&repo, execution.clone(), 3).await;
        repo.mark_running(execution.id, Utc::now()).await.unwrap();

        handler.on_dead_letter(&job, &JobError::timeout(900)).await;
        let stored = repo.get(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PluginExecutionStatus::Failed);
        assert!(stored.error.unwrap().contains("timed out"));
    }
}
