//! Worker pool: dequeue, dispatch to handlers, heartbeat, retry and dead-letter.
//!
//! Shutdown: cancelling the token passed to [`Worker::run`] stops dequeuing.
//! `run` then waits up to `shutdown_grace` for in-flight jobs. Jobs still
//! running afterwards keep their lease and are redelivered once it expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use shu_core::models::{Job, WorkloadType};
use shu_core::{JobError, WorkerSettings};

use crate::backend::QueueBackend;
use crate::handler::{HandlerRegistry, JobHandler};
use crate::routing::WorkloadRouting;

const NO_HANDLER_REASON: &str = "no handler";

/// Delay before redelivering a job that failed on its `attempts`-th delivery:
/// `base * 2^(attempts - 1)`, capped at `max_secs`.
pub fn compute_retry_backoff(attempts: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exponent = attempts.saturating_sub(1).min(63);
    let secs = base_secs
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(max_secs);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workload_types: Vec<WorkloadType>,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
    /// `None` means half the job's visibility timeout.
    pub heartbeat_interval_secs: Option<u64>,
    pub retry_base_delay_secs: u64,
    pub max_retry_backoff_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            workload_types: settings.workload_types.clone(),
            concurrency: settings.concurrency.max(1),
            poll_interval_ms: settings.poll_interval_ms,
            job_timeout_secs: settings.job_timeout_secs.max(1),
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            retry_base_delay_secs: settings.retry_base_delay_secs,
            max_retry_backoff_secs: settings.max_retry_backoff_secs,
            shutdown_grace_secs: settings.shutdown_grace_secs,
        }
    }

    fn heartbeat_interval(&self, visibility_timeout: Duration) -> Duration {
        self.heartbeat_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(visibility_timeout / 2)
            .max(Duration::from_secs(1))
    }
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    backend: Arc<dyn QueueBackend>,
    routing: Arc<WorkloadRouting>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    stats: WorkerStats,
}

pub struct Worker {
    shared: Arc<Shared>,
    queues: Vec<String>,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        routing: Arc<WorkloadRouting>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let queues = routing.queues_for(&config.workload_types);
        Self {
            shared: Arc::new(Shared {
                backend,
                routing,
                registry,
                config,
                stats: WorkerStats::default(),
            }),
            queues,
        }
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Consume jobs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let config = &self.shared.config;
        tracing::info!(
            queues = ?self.queues,
            concurrency = config.concurrency,
            poll_interval_ms = config.poll_interval_ms,
            "Worker started"
        );
        if self.queues.is_empty() {
            tracing::warn!("Worker has no queues to consume");
        }

        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        while !shutdown.is_cancelled() {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::trace!("No free worker slot, waiting");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(poll_interval) => continue,
                    }
                }
            };

            match self.shared.backend.dequeue(&self.queues).await {
                Ok(Some(job)) => self.dispatch(job, permit).await,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!("Worker stopping, waiting for in-flight jobs");
        let grace = Duration::from_secs(config.shutdown_grace_secs);
        let all_slots = u32::try_from(config.concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, semaphore.acquire_many(all_slots)).await {
            Ok(_) => tracing::info!("Worker stopped"),
            Err(_) => tracing::warn!(
                grace_secs = config.shutdown_grace_secs,
                "Shutdown grace elapsed with jobs still running; their leases will expire"
            ),
        };
    }

    async fn dispatch(&self, job: Job, permit: OwnedSemaphorePermit) {
        let handler = self
            .shared
            .routing
            .workload_of(&job)
            .and_then(|workload| self.shared.registry.get(workload));

        let Some(handler) = handler else {
            tracing::error!(job.id = %job.id, queue = %job.queue_name, "No handler for job, dead-lettering");
            self.shared.stats.processed.fetch_add(1, Ordering::Relaxed);
            match self.shared.backend.dead_letter(&job, NO_HANDLER_REASON).await {
                Ok(()) => {
                    self.shared.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::error!(job.id = %job.id, error = %e, "Failed to dead-letter job"),
            }
            return;
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            process_job(shared, handler, job).await;
        });
    }
}

#[tracing::instrument(skip(shared, handler, job), fields(job.id = %job.id, queue = %job.queue_name, attempt = job.attempts))]
async fn process_job(shared: Arc<Shared>, handler: Arc<dyn JobHandler>, job: Job) {
    let heartbeat = spawn_heartbeat(
        shared.backend.clone(),
        job.clone(),
        shared.config.heartbeat_interval(job.visibility_timeout()),
    );

    let timeout_secs = shared.config.job_timeout_secs;
    let mut run = {
        let handler = handler.clone();
        let job = job.clone();
        tokio::spawn(async move { handler.handle(&job).await })
    };

    let outcome = match tokio::time::timeout(Duration::from_secs(timeout_secs), &mut run).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(JobError::recoverable(anyhow::anyhow!(
            "Job handler panicked: {}",
            join_err
        ))),
        Err(_) => {
            run.abort();
            Err(JobError::timeout(timeout_secs))
        }
    };
    heartbeat.abort();

    settle(&shared, handler.as_ref(), &job, outcome).await;
}

fn spawn_heartbeat(
    backend: Arc<dyn QueueBackend>,
    job: Job,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match backend
                .extend_visibility(&job, job.visibility_timeout())
                .await
            {
                Ok(true) => tracing::trace!(job.id = %job.id, "Lease extended"),
                Ok(false) => {
                    tracing::warn!(
                        job.id = %job.id,
                        "Lease lost while job is running; it may be delivered again"
                    );
                    break;
                }
                Err(e) => tracing::warn!(job.id = %job.id, error = %e, "Heartbeat failed"),
            }
        }
    })
}

async fn settle(
    shared: &Shared,
    handler: &dyn JobHandler,
    job: &Job,
    outcome: Result<(), JobError>,
) {
    let stats = &shared.stats;
    stats.processed.fetch_add(1, Ordering::Relaxed);

    let error = match outcome {
        Ok(()) => {
            if let Err(e) = shared.backend.acknowledge(job).await {
                tracing::error!(error = %e, "Failed to acknowledge job");
            }
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Job completed successfully");
            return;
        }
        Err(error) => error,
    };

    let message = error.to_string();
    tracing::error!(
        error = %message,
        attempts = job.attempts,
        max_attempts = job.max_attempts,
        recoverable = error.is_recoverable(),
        "Job execution failed"
    );

    if error.is_recoverable() && job.can_retry() {
        let backoff = compute_retry_backoff(
            job.attempts,
            shared.config.retry_base_delay_secs,
            shared.config.max_retry_backoff_secs,
        );
        let delay = error.retry_after().map_or(backoff, |hint| hint.max(backoff));
        tracing::info!(backoff_ms = delay.as_millis() as u64, "Scheduling job retry");
        match shared.backend.retry(job, delay, &message).await {
            Ok(()) => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::error!(error = %e, "Failed to schedule retry; lease will expire"),
        }
        return;
    }

    if let Err(e) = shared.backend.dead_letter(job, &message).await {
        tracing::error!(error = %e, "Failed to dead-letter job");
    } else {
        stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Job dead-lettered, will not retry");
    }
    handler.on_dead_letter(job, &error).await;
}
