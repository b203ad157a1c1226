use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shu_core::models::{PluginExecution, PluginExecutionStatus};

use crate::{DbError, DbResult, PluginExecutionRepository};

#[derive(Clone, Default)]
pub struct InMemoryPluginExecutionRepository {
    executions: Arc<RwLock<HashMap<Uuid, PluginExecution>>>,
}

impl InMemoryPluginExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<PluginExecution> {
        let mut all: Vec<_> = self.executions.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        all
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> DbResult<PluginExecution>
    where
        F: FnOnce(&mut PluginExecution) + Send,
    {
        let mut executions = self.executions.write().await;
        let execution = executions.get_mut(&id).ok_or(DbError::NotFound {
            entity: "plugin execution",
            id,
        })?;
        f(execution);
        Ok(execution.clone())
    }
}

#[async_trait]
impl PluginExecutionRepository for InMemoryPluginExecutionRepository {
    async fn create(&self, execution: PluginExecution) -> DbResult<PluginExecution> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(DbError::Conflict {
                entity: "plugin execution",
                id: execution.id,
            });
        }
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<PluginExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, execution: PluginExecution) -> DbResult<PluginExecution> {
        let id = execution.id;
        self.modify(id, move |slot| *slot = execution).await
    }

    async fn mark_running(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<PluginExecution> {
        self.modify(id, |e| {
            e.status = PluginExecutionStatus::Running;
            e.started_at = Some(now);
            e.heartbeat_at = Some(now);
            e.attempts += 1;
        })
        .await
    }

    async fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<()> {
        self.modify(id, |e| {
            if e.status == PluginExecutionStatus::Running {
                e.heartbeat_at = Some(now);
            }
        })
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DbResult<PluginExecution> {
        self.modify(id, |e| {
            e.status = PluginExecutionStatus::Completed;
            e.result = Some(result);
            e.error = None;
            e.completed_at = Some(now);
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        now: DateTime<Utc>,
    ) -> DbResult<PluginExecution> {
        self.modify(id, |e| {
            e.status = PluginExecutionStatus::Failed;
            e.error = Some(error);
            e.completed_at = Some(now);
        })
        .await
    }

    async fn reset_pending(&self, id: Uuid, error: Option<String>) -> DbResult<PluginExecution> {
        self.modify(id, |e| {
            e.status = PluginExecutionStatus::Pending;
            e.heartbeat_at = None;
            if error.is_some() {
                e.error = error;
            }
        })
        .await
    }

    async fn list_active_for_feed(&self, feed_id: Uuid) -> DbResult<Vec<PluginExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.feed_id == Some(feed_id) && e.status.is_active())
            .cloned()
            .collect())
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<PluginExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| {
                e.status == PluginExecutionStatus::Running
                    && e.last_seen_at().map_or(true, |seen| seen < cutoff)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution() -> PluginExecution {
        PluginExecution::new("calendar", "sync", json!({}), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let repo = InMemoryPluginExecutionRepository::new();
        let e = repo.create(execution()).await.unwrap();
        let now = Utc::now();

        let running = repo.mark_running(e.id, now).await.unwrap();
        assert_eq!(running.status, PluginExecutionStatus::Running);
        assert_eq!(running.attempts, 1);
        assert_eq!(running.started_at, Some(now));

        let done = repo
            .mark_completed(e.id, json!({"items": 3}), now)
            .await
            .unwrap();
        assert_eq!(done.status, PluginExecutionStatus::Completed);
        assert_eq!(done.result, Some(json!({"items": 3})));
        assert_eq!(done.completed_at, Some(now));
    }

    #[tokio::test]
    async fn test_list_stale_uses_heartbeat() {
        let repo = InMemoryPluginExecutionRepository::new();
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(30);

        let stale = repo.create(execution()).await.unwrap();
        repo.mark_running(stale.id, old).await.unwrap();

        let alive = repo.create(execution()).await.unwrap();
        repo.mark_running(alive.id, old).await.unwrap();
        repo.touch_heartbeat(alive.id, now).await.unwrap();

        let pending = repo.create(execution()).await.unwrap();

        let found = repo
            .list_stale(now - chrono::Duration::minutes(15))
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![stale.id]);
        assert!(!ids.contains(&pending.id));
    }

    #[tokio::test]
    async fn test_list_active_for_feed() {
        let repo = InMemoryPluginExecutionRepository::new();
        let feed_id = Uuid::new_v4();

        let active = repo.create(execution().for_feed(feed_id)).await.unwrap();
        let finished = repo.create(execution().for_feed(feed_id)).await.unwrap();
        repo.mark_failed(finished.id, "boom".to_string(), Utc::now())
            .await
            .unwrap();
        repo.create(execution()).await.unwrap();

        let found = repo.list_active_for_feed(feed_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, active.id);
    }

    #[tokio::test]
    async fn test_reset_pending_clears_heartbeat() {
        let repo = InMemoryPluginExecutionRepository::new();
        let e = repo.create(execution()).await.unwrap();
        repo.mark_running(e.id, Utc::now()).await.unwrap();
        let reset = repo
            .reset_pending(e.id, Some("timeout".to_string()))
            .await
            .unwrap();
        assert_eq!(reset.status, PluginExecutionStatus::Pending);
        assert!(reset.heartbeat_at.is_none());
        assert_eq!(reset.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_heartbeat_ignored_once_finished() {
        let repo = InMemoryPluginExecutionRepository::new();
        let e = repo.create(execution()).await.unwrap();
        let started = Utc::now();
        repo.mark_running(e.id, started).await.unwrap();
        repo.mark_failed(e.id, "timed out".to_string(), started)
            .await
            .unwrap();

        repo.touch_heartbeat(e.id, started + chrono::Duration::minutes(5))
            .await
            .unwrap();
        let stored = repo.get(e.id).await.unwrap().unwrap();
        assert_eq!(stored.heartbeat_at, Some(started));

        let pending = repo.create(execution()).await.unwrap();
        repo.touch_heartbeat(pending.id, started).await.unwrap();
        assert!(repo.get(pending.id).await.unwrap().unwrap().heartbeat_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_execution() {
        let repo = InMemoryPluginExecutionRepository::new();
        assert!(matches!(
            repo.touch_heartbeat(Uuid::new_v4(), Utc::now()).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
