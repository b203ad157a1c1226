use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shu_core::models::PluginFeed;

use crate::{DbError, DbResult, FeedRepository};

#[derive(Clone, Default)]
pub struct InMemoryFeedRepository {
    feeds: Arc<RwLock<HashMap<Uuid, PluginFeed>>>,
}

impl InMemoryFeedRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedRepository for InMemoryFeedRepository {
    async fn insert(&self, feed: PluginFeed) -> DbResult<PluginFeed> {
        let mut feeds = self.feeds.write().await;
        if feeds.contains_key(&feed.id) {
            return Err(DbError::Conflict {
                entity: "feed",
                id: feed.id,
            });
        }
        feeds.insert(feed.id, feed.clone());
        Ok(feed)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<PluginFeed>> {
        Ok(self.feeds.read().await.get(&id).cloned())
    }

    async fn list(&self) -> DbResult<Vec<PluginFeed>> {
        let mut all: Vec<_> = self.feeds.read().await.values().cloned().collect();
        all.sort_by_key(|f| f.created_at);
        Ok(all)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<PluginFeed>> {
        let mut due: Vec<_> = self
            .feeds
            .read()
            .await
            .values()
            .filter(|f| f.is_due(now))
            .cloned()
            .collect();
        // `None` sorts before `Some`, so never-run feeds go first.
        due.sort_by_key(|f| (f.next_run_at, f.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> DbResult<PluginFeed> {
        let mut feeds = self.feeds.write().await;
        let feed = feeds
            .get_mut(&id)
            .ok_or(DbError::NotFound { entity: "feed", id })?;
        feed.last_run_at = Some(last_run_at);
        feed.next_run_at = Some(next_run_at);
        Ok(feed.clone())
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> DbResult<PluginFeed> {
        let mut feeds = self.feeds.write().await;
        let feed = feeds
            .get_mut(&id)
            .ok_or(DbError::NotFound { entity: "feed", id })?;
        feed.enabled = enabled;
        Ok(feed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(name: &str) -> PluginFeed {
        PluginFeed::new(name, "rss", "poll", json!({}), Uuid::new_v4(), 60)
    }

    #[tokio::test]
    async fn test_list_due_orders_and_limits() {
        let repo = InMemoryFeedRepository::new();
        let now = Utc::now();

        let mut late = feed("late");
        late.next_run_at = Some(now - chrono::Duration::minutes(1));
        let mut later = feed("later");
        later.next_run_at = Some(now - chrono::Duration::minutes(10));
        let fresh = feed("fresh");
        let mut future = feed("future");
        future.next_run_at = Some(now + chrono::Duration::minutes(5));

        for f in [late.clone(), later.clone(), fresh.clone(), future] {
            repo.insert(f).await.unwrap();
        }

        let due = repo.list_due(now, 10).await.unwrap();
        let names: Vec<&str> = due.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "later", "late"]);

        let limited = repo.list_due(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_disabled_feed_not_due() {
        let repo = InMemoryFeedRepository::new();
        let f = repo.insert(feed("off")).await.unwrap();
        repo.set_enabled(f.id, false).await.unwrap();
        assert!(repo.list_due(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_run() {
        let repo = InMemoryFeedRepository::new();
        let f = repo.insert(feed("a")).await.unwrap();
        let now = Utc::now();
        let next = now + chrono::Duration::seconds(60);
        let updated = repo.record_run(f.id, now, next).await.unwrap();
        assert_eq!(updated.last_run_at, Some(now));
        assert_eq!(updated.next_run_at, Some(next));
        assert!(repo.list_due(now, 10).await.unwrap().is_empty());
    }
}
