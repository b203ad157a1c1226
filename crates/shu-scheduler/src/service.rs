//! Feed scheduler.
//!
//! Each tick first sweeps executions whose heartbeat went quiet, then starts
//! the feeds that are due. Missed intervals are never replayed: a feed that
//! was due several times over runs once and is pushed to `now + interval`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shu_core::models::{Job, PluginExecution, PluginExecutionPayload, PluginFeed, WorkloadType};
use shu_db::{FeedRepository, PluginExecutionRepository};
use shu_plugins::PluginRegistry;
use shu_worker::{enqueue_workload, QueueBackend, WorkloadRouting};

use crate::config::SchedulerConfig;

pub const STALE_ERROR: &str = "stale: heartbeat timed out";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTickReport {
    /// Feeds that were due this tick.
    pub due: usize,
    pub enqueued: Vec<Uuid>,
    /// Due feeds that still had a pending or running execution.
    pub skipped_overlap: usize,
    /// Due feeds whose plugin is missing, disabled, or not feed-allowed.
    pub skipped_ineligible: usize,
    pub failed: usize,
    /// Stale executions swept before scheduling.
    pub stale: usize,
}

enum FeedOutcome {
    Enqueued(PluginExecution),
    Overlap,
    Ineligible(String),
}

pub struct PluginsSchedulerService {
    feeds: Arc<dyn FeedRepository>,
    executions: Arc<dyn PluginExecutionRepository>,
    registry: PluginRegistry,
    backend: Arc<dyn QueueBackend>,
    routing: Arc<WorkloadRouting>,
    config: SchedulerConfig,
}

impl PluginsSchedulerService {
    pub fn new(
        feeds: Arc<dyn FeedRepository>,
        executions: Arc<dyn PluginExecutionRepository>,
        registry: PluginRegistry,
        backend: Arc<dyn QueueBackend>,
        routing: Arc<WorkloadRouting>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            feeds,
            executions,
            registry,
            backend,
            routing,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run until `shutdown` fires. Tick errors are logged and the loop goes on.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_interval_secs = self.config.tick_interval_secs,
            batch_limit = self.config.batch_limit,
            "Plugin feed scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Plugin feed scheduler shutting down");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<SchedulerTickReport> {
        let stale = self.sweep_stale(now).await?;
        let mut report = self.run_due(now).await?;
        report.stale = stale;
        if report.due > 0 || stale > 0 {
            tracing::info!(
                due = report.due,
                enqueued = report.enqueued.len(),
                skipped_overlap = report.skipped_overlap,
                skipped_ineligible = report.skipped_ineligible,
                failed = report.failed,
                stale,
                "Scheduler tick finished"
            );
        }
        Ok(report)
    }

    /// Start due feeds, oldest first, up to `batch_limit`.
    #[tracing::instrument(skip(self))]
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<SchedulerTickReport> {
        let due = self
            .feeds
            .list_due(now, self.config.batch_limit)
            .await
            .context("Failed to list due feeds")?;

        let mut report = SchedulerTickReport {
            due: due.len(),
            ..Default::default()
        };

        for feed in due {
            match self.start_feed(&feed, now).await {
                Ok(outcome) => {
                    match outcome {
                        FeedOutcome::Enqueued(execution) => report.enqueued.push(execution.id),
                        FeedOutcome::Overlap => {
                            tracing::debug!(feed.id = %feed.id, "Previous run still active, skipping");
                            report.skipped_overlap += 1;
                        }
                        FeedOutcome::Ineligible(reason) => {
                            tracing::warn!(feed.id = %feed.id, plugin = %feed.plugin_name, reason = %reason, "Feed skipped");
                            report.skipped_ineligible += 1;
                        }
                    }
                    // Skipped feeds advance too, or they would hold a batch slot every tick.
                    if let Err(e) = self
                        .feeds
                        .record_run(feed.id, now, feed.next_run_after(now))
                        .await
                    {
                        tracing::error!(feed.id = %feed.id, error = %e, "Failed to advance feed schedule");
                    }
                }
                Err(e) => {
                    tracing::error!(feed.id = %feed.id, error = %e, "Failed to start feed run");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Fail, or requeue when `stale_retry` is set, running executions whose
    /// last heartbeat is older than `stale_after_secs`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.stale_after();
        let stale = self
            .executions
            .list_stale(cutoff)
            .await
            .context("Failed to list stale executions")?;

        let mut swept = 0;
        for execution in stale {
            let result = if self.config.stale_retry {
                self.requeue(&execution).await
            } else {
                self.executions
                    .mark_failed(execution.id, STALE_ERROR.to_string(), now)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            };
            match result {
                Ok(()) => {
                    tracing::warn!(
                        execution.id = %execution.id,
                        plugin = %execution.plugin_name,
                        requeued = self.config.stale_retry,
                        "Stale plugin execution swept"
                    );
                    swept += 1;
                }
                Err(e) => {
                    tracing::error!(execution.id = %execution.id, error = %e, "Failed to sweep stale execution")
                }
            }
        }
        Ok(swept)
    }

    /// Start one run of a feed now, whatever its schedule says. The next
    /// scheduled run is left where it was.
    #[tracing::instrument(skip(self))]
    pub async fn run_now(&self, feed_id: Uuid) -> Result<PluginExecution> {
        let feed = self
            .feeds
            .get(feed_id)
            .await
            .context("Failed to load feed")?
            .ok_or_else(|| anyhow!("Feed {} not found", feed_id))?;
        let now = Utc::now();

        match self.start_feed(&feed, now).await? {
            FeedOutcome::Enqueued(execution) => {
                let next = feed.next_run_at.unwrap_or_else(|| feed.next_run_after(now));
                self.feeds
                    .record_run(feed.id, now, next)
                    .await
                    .context("Failed to record feed run")?;
                Ok(execution)
            }
            FeedOutcome::Overlap => Err(anyhow!("Feed {} already has an active run", feed_id)),
            FeedOutcome::Ineligible(reason) => Err(anyhow!("Feed {} cannot run: {}", feed_id, reason)),
        }
    }

    async fn start_feed(
        &self,
        feed: &PluginFeed,
        now: DateTime<Utc>,
    ) -> Result<FeedOutcome> {
        if let Some(reason) = self.ineligibility(feed).await {
            return Ok(FeedOutcome::Ineligible(reason));
        }

        let active = self
            .executions
            .list_active_for_feed(feed.id)
            .await
            .context("Failed to list active executions")?;
        if !active.is_empty() {
            return Ok(FeedOutcome::Overlap);
        }

        let execution = PluginExecution::new(
            feed.plugin_name.clone(),
            feed.operation.clone(),
            feed.params.clone(),
            feed.user_id,
        )
        .for_feed(feed.id)
        .with_kb_grants(feed.kb_grants.clone());
        let execution = self
            .executions
            .create(execution)
            .await
            .context("Failed to create execution")?;

        if let Err(e) = self.enqueue(&execution).await {
            // Without a job the pending record would block every later run.
            if let Err(db_err) = self
                .executions
                .mark_failed(execution.id, format!("enqueue failed: {}", e), now)
                .await
            {
                tracing::error!(execution.id = %execution.id, error = %db_err, "Failed to mark execution as failed");
            }
            return Err(e);
        }

        tracing::info!(
            feed.id = %feed.id,
            execution.id = %execution.id,
            plugin = %feed.plugin_name,
            operation = %feed.operation,
            "Feed run enqueued"
        );
        Ok(FeedOutcome::Enqueued(execution))
    }

    async fn ineligibility(&self, feed: &PluginFeed) -> Option<String> {
        let plugin = match self.registry.get(&feed.plugin_name).await {
            Ok(plugin) => plugin,
            Err(e) => return Some(e.to_string()),
        };
        if !self.registry.is_enabled(&feed.plugin_name).await {
            return Some(format!("plugin '{}' is disabled", feed.plugin_name));
        }
        match plugin.manifest().operation(&feed.operation) {
            None => Some(format!(
                "plugin '{}' has no operation '{}'",
                feed.plugin_name, feed.operation
            )),
            Some(op) if !op.feed_allowed => Some(format!(
                "operation '{}' is not allowed in feeds",
                feed.operation
            )),
            Some(_) => None,
        }
    }

    async fn enqueue(&self, execution: &PluginExecution) -> Result<Job> {
        let payload = Job::payload_from(&PluginExecutionPayload {
            execution_id: execution.id,
        })?;
        let job = enqueue_workload(
            self.backend.as_ref(),
            &self.routing,
            WorkloadType::PluginExecution,
            payload,
        )
        .await
        .context("Failed to enqueue plugin execution")?;
        Ok(job)
    }

    async fn requeue(&self, execution: &PluginExecution) -> Result<()> {
        self.executions
            .reset_pending(execution.id, Some(STALE_ERROR.to_string()))
            .await
            .context("Failed to reset stale execution")?;
        self.enqueue(execution).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shu_core::models::PluginExecutionStatus;
    use shu_db::{InMemoryFeedRepository, InMemoryPluginExecutionRepository};
    use shu_plugins::test_helpers::echo_plugin;
    use shu_worker::InMemoryQueueBackend;
    use std::time::Duration;

    struct Fixture {
        feeds: InMemoryFeedRepository,
        executions: InMemoryPluginExecutionRepository,
        backend: Arc<InMemoryQueueBackend>,
        registry: PluginRegistry,
        service: PluginsSchedulerService,
    }

    async fn fixture(config: SchedulerConfig) -> Fixture {
        let feeds = InMemoryFeedRepository::new();
        let executions = InMemoryPluginExecutionRepository::new();
        let backend = Arc::new(InMemoryQueueBackend::new());
        let registry = PluginRegistry::new();
        registry.register(Arc::new(echo_plugin())).await.unwrap();
        let service = PluginsSchedulerService::new(
            Arc::new(feeds.clone()),
            Arc::new(executions.clone()),
            registry.clone(),
            backend.clone(),
            Arc::new(WorkloadRouting::default()),
            config,
        );
        Fixture {
            feeds,
            executions,
            backend,
            registry,
            service,
        }
    }

    fn feed(operation: &str) -> PluginFeed {
        PluginFeed::new("digest", "echo", operation, json!({"message": "hi"}), Uuid::new_v4(), 3600)
    }

    impl Fixture {
        async fn queued(&self) -> usize {
            self.backend.queue_length("shu:plugin_execution").await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_due_feed_is_enqueued_and_advanced() {
        let fx = fixture(SchedulerConfig::default()).await;
        let kb = Uuid::new_v4();
        let mut f = feed("echo");
        f.kb_grants = vec![kb];
        let f = fx.feeds.insert(f).await.unwrap();
        let now = Utc::now();

        let report = fx.service.run_due(now).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.enqueued.len(), 1);
        let execution = fx.executions.get(report.enqueued[0]).await.unwrap().unwrap();
        assert_eq!(execution.status, PluginExecutionStatus::Pending);
        assert_eq!(execution.feed_id, Some(f.id));
        assert_eq!(execution.kb_grants, vec![kb]);
        assert_eq!(fx.queued().await, 1);

        let stored = fx.feeds.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run_at, Some(now));
        assert_eq!(stored.next_run_at, Some(now + chrono::Duration::seconds(3600)));
        assert!(fx.service.run_due(now).await.unwrap().enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_missed_intervals_are_not_replayed() {
        let fx = fixture(SchedulerConfig::default()).await;
        let now = Utc::now();
        let mut f = feed("echo");
        f.next_run_at = Some(now - chrono::Duration::hours(10));
        let f = fx.feeds.insert(f).await.unwrap();

        assert_eq!(fx.service.run_due(now).await.unwrap().enqueued.len(), 1);
        let stored = fx.feeds.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(now + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_feed_with_huge_interval_is_scheduled() {
        let fx = fixture(SchedulerConfig::default()).await;
        let mut f = feed("echo");
        f.interval_secs = u64::MAX;
        let f = fx.feeds.insert(f).await.unwrap();
        let now = Utc::now();

        assert_eq!(fx.service.run_due(now).await.unwrap().enqueued.len(), 1);
        let stored = fx.feeds.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(now + chrono::Duration::days(36_500)));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped_but_advanced() {
        let fx = fixture(SchedulerConfig::default()).await;
        let f = fx.feeds.insert(feed("echo")).await.unwrap();
        let running = PluginExecution::new("echo", "echo", json!({}), f.user_id).for_feed(f.id);
        let running = fx.executions.create(running).await.unwrap();
        fx.executions.mark_running(running.id, Utc::now()).await.unwrap();
        let now = Utc::now();

        let report = fx.service.run_due(now).await.unwrap();

        assert_eq!(report.skipped_overlap, 1);
        assert!(report.enqueued.is_empty());
        assert_eq!(fx.queued().await, 0);
        let stored = fx.feeds.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(f.next_run_after(now)));
    }

    #[tokio::test]
    async fn test_ineligible_feeds_are_skipped() {
        let fx = fixture(SchedulerConfig::default()).await;
        fx.feeds.insert(feed("shout")).await.unwrap();
        fx.feeds.insert(feed("missing_op")).await.unwrap();
        let mut other = feed("echo");
        other.plugin_name = "not_registered".to_string();
        fx.feeds.insert(other).await.unwrap();

        let report = fx.service.run_due(Utc::now()).await.unwrap();
        assert_eq!(report.due, 3);
        assert_eq!(report.skipped_ineligible, 3);
        assert_eq!(fx.queued().await, 0);
        assert!(fx.executions.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_skipped() {
        let fx = fixture(SchedulerConfig::default()).await;
        fx.feeds.insert(feed("echo")).await.unwrap();
        fx.registry.set_enabled("echo", false).await.unwrap();

        let report = fx.service.run_due(Utc::now()).await.unwrap();
        assert_eq!(report.skipped_ineligible, 1);
        assert_eq!(fx.queued().await, 0);
    }

    #[tokio::test]
    async fn test_batch_limit_takes_oldest_first() {
        let config = SchedulerConfig {
            batch_limit: 2,
            ..SchedulerConfig::default()
        };
        let fx = fixture(config).await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for hours in [3, 1, 2] {
            let mut f = feed("echo");
            f.next_run_at = Some(now - chrono::Duration::hours(hours));
            ids.push(fx.feeds.insert(f).await.unwrap().id);
        }

        let report = fx.service.run_due(now).await.unwrap();
        assert_eq!(report.due, 2);
        let started: Vec<Option<Uuid>> = feed_ids_of(&fx, &report).await;
        assert!(started.contains(&Some(ids[0])));
        assert!(started.contains(&Some(ids[2])));
        assert!(!started.contains(&Some(ids[1])));
    }

    async fn feed_ids_of(fx: &Fixture, report: &SchedulerTickReport) -> Vec<Option<Uuid>> {
        let mut out = Vec::new();
        for id in &report.enqueued {
            out.push(fx.executions.get(*id).await.unwrap().unwrap().feed_id);
        }
        out
    }

    #[tokio::test]
    async fn test_sweep_stale_marks_failed() {
        let fx = fixture(SchedulerConfig::default()).await;
        let now = Utc::now();
        let stale = fx
            .executions
            .create(PluginExecution::new("echo", "echo", json!({}), Uuid::new_v4()))
            .await
            .unwrap();
        fx.executions
            .mark_running(stale.id, now - chrono::Duration::minutes(20))
            .await
            .unwrap();
        let fresh = fx
            .executions
            .create(PluginExecution::new("echo", "echo", json!({}), Uuid::new_v4()))
            .await
            .unwrap();
        fx.executions
            .mark_running(fresh.id, now - chrono::Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(fx.service.sweep_stale(now).await.unwrap(), 1);

        let swept = fx.executions.get(stale.id).await.unwrap().unwrap();
        assert_eq!(swept.status, PluginExecutionStatus::Failed);
        assert_eq!(swept.error.as_deref(), Some(STALE_ERROR));
        let untouched = fx.executions.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, PluginExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_sweep_stale_can_requeue() {
        let config = SchedulerConfig {
            stale_retry: true,
            ..SchedulerConfig::default()
        };
        let fx = fixture(config).await;
        let now = Utc::now();
        let stale = fx
            .executions
            .create(PluginExecution::new("echo", "echo", json!({}), Uuid::new_v4()))
            .await
            .unwrap();
        fx.executions
            .mark_running(stale.id, now - chrono::Duration::hours(1))
            .await
            .unwrap();

        let report = fx.service.tick(now).await.unwrap();
        assert_eq!(report.stale, 1);

        let requeued = fx.executions.get(stale.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, PluginExecutionStatus::Pending);
        assert_eq!(fx.queued().await, 1);
    }

    #[tokio::test]
    async fn test_run_now_ignores_schedule() {
        let fx = fixture(SchedulerConfig::default()).await;
        let later = Utc::now() + chrono::Duration::hours(5);
        let mut f = feed("echo");
        f.next_run_at = Some(later);
        let f = fx.feeds.insert(f).await.unwrap();

        let execution = fx.service.run_now(f.id).await.unwrap();
        assert_eq!(execution.feed_id, Some(f.id));
        assert_eq!(fx.queued().await, 1);
        let stored = fx.feeds.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(later));
        assert!(stored.last_run_at.is_some());

        let err = fx.service.run_now(f.id).await.unwrap_err();
        assert!(err.to_string().contains("active run"));
        assert!(fx.service.run_now(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_ticks_until_cancelled() {
        let fx = fixture(SchedulerConfig {
            tick_interval_secs: 5,
            ..SchedulerConfig::default()
        })
        .await;
        fx.feeds.insert(feed("echo")).await.unwrap();

        let service = Arc::new(fx.service);
        let shutdown = CancellationToken::new();
        let handle = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.backend.queue_length("shu:plugin_execution").await.unwrap(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
