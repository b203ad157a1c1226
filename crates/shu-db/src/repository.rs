//! Repository traits for the records the worker pipeline reads and writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shu_core::models::{Document, DocumentStatus, PluginExecution, PluginFeed};

use crate::DbResult;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, document: Document) -> DbResult<Document>;

    async fn get(&self, id: Uuid) -> DbResult<Option<Document>>;

    /// Replace a stored document. Bumps `updated_at`.
    async fn update(&self, document: Document) -> DbResult<Document>;

    /// Move a document to `status`, recording `error_message` when given.
    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> DbResult<Document>;
}

#[async_trait]
pub trait PluginExecutionRepository: Send + Sync {
    async fn create(&self, execution: PluginExecution) -> DbResult<PluginExecution>;

    async fn get(&self, id: Uuid) -> DbResult<Option<PluginExecution>>;

    async fn update(&self, execution: PluginExecution) -> DbResult<PluginExecution>;

    /// Claim the run: `Running`, `started_at`/`heartbeat_at` set to `now`,
    /// `attempts` incremented.
    async fn mark_running(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<PluginExecution>;

    /// Only a `Running` record takes the heartbeat; any other status is left alone.
    async fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<()>;

    async fn mark_completed(
        &self,
        id: Uuid,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DbResult<PluginExecution>;

    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        now: DateTime<Utc>,
    ) -> DbResult<PluginExecution>;

    /// Put a run back to `Pending` ahead of a retry.
    async fn reset_pending(&self, id: Uuid, error: Option<String>) -> DbResult<PluginExecution>;

    /// Pending or running executions spawned by a feed.
    async fn list_active_for_feed(&self, feed_id: Uuid) -> DbResult<Vec<PluginExecution>>;

    /// Running executions whose last heartbeat (or start) is older than `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<PluginExecution>>;
}

#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn insert(&self, feed: PluginFeed) -> DbResult<PluginFeed>;

    async fn get(&self, id: Uuid) -> DbResult<Option<PluginFeed>>;

    async fn list(&self) -> DbResult<Vec<PluginFeed>>;

    /// Enabled feeds due at `now`, never-run feeds first, then by `next_run_at`.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<PluginFeed>>;

    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> DbResult<PluginFeed>;

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> DbResult<PluginFeed>;
}
