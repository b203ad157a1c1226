use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::job::chrono_duration;

/// A recurring scheduled execution of a plugin operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginFeed {
    pub id: Uuid,
    pub name: String,
    pub plugin_name: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub user_id: Uuid,
    pub interval_secs: u64,
    pub enabled: bool,
    /// Knowledge bases the feed's runs may write to.
    #[serde(default)]
    pub kb_grants: Vec<Uuid>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PluginFeed {
    pub fn new(
        name: impl Into<String>,
        plugin_name: impl Into<String>,
        operation: impl Into<String>,
        params: serde_json::Value,
        user_id: Uuid,
        interval_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            plugin_name: plugin_name.into(),
            operation: operation.into(),
            params,
            user_id,
            interval_secs: interval_secs.max(1),
            enabled: true,
            kb_grants: Vec::new(),
            next_run_at: None,
            last_run_at: None,
            created_at: Utc::now(),
        }
    }

    /// A feed that has never been scheduled is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.map_or(true, |next| next <= now)
    }

    /// Intervals beyond a century are capped, and the result saturates at the
    /// latest representable instant.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = chrono_duration(Duration::from_secs(self.interval_secs.max(1)));
        now.checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed() -> PluginFeed {
        PluginFeed::new("inbox", "gmail", "ingest", json!({}), Uuid::new_v4(), 3600)
    }

    #[test]
    fn test_new_feed_is_due() {
        assert!(feed().is_due(Utc::now()));
    }

    #[test]
    fn test_disabled_feed_is_never_due() {
        let mut f = feed();
        f.enabled = false;
        assert!(!f.is_due(Utc::now()));
    }

    #[test]
    fn test_due_after_next_run() {
        let now = Utc::now();
        let mut f = feed();
        f.next_run_at = Some(f.next_run_after(now));
        assert!(!f.is_due(now));
        assert!(f.is_due(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_huge_interval_is_capped() {
        let now = Utc::now();
        let f = PluginFeed::new("x", "p", "op", json!({}), Uuid::new_v4(), 10_000_000_000_000);
        let next = f.next_run_after(now);
        assert_eq!(next, now + chrono::Duration::days(36_500));

        let mut max = f.clone();
        max.interval_secs = u64::MAX;
        assert_eq!(max.next_run_after(DateTime::<Utc>::MAX_UTC), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_interval_clamped() {
        let f = PluginFeed::new("x", "p", "op", json!({}), Uuid::new_v4(), 0);
        assert_eq!(f.interval_secs, 1);
    }
}
