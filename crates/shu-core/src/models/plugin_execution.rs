use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::{JobPayload, WorkloadType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PluginExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PluginExecutionStatus::Completed
                | PluginExecutionStatus::Failed
                | PluginExecutionStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PluginExecutionStatus::Pending | PluginExecutionStatus::Running
        )
    }
}

impl Display for PluginExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PluginExecutionStatus::Pending => write!(f, "pending"),
            PluginExecutionStatus::Running => write!(f, "running"),
            PluginExecutionStatus::Completed => write!(f, "completed"),
            PluginExecutionStatus::Failed => write!(f, "failed"),
            PluginExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for PluginExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PluginExecutionStatus::Pending),
            "running" => Ok(PluginExecutionStatus::Running),
            "completed" => Ok(PluginExecutionStatus::Completed),
            "failed" => Ok(PluginExecutionStatus::Failed),
            "cancelled" => Ok(PluginExecutionStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid plugin execution status: {}", s)),
        }
    }
}

/// Record of one plugin operation run, read by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginExecution {
    pub id: Uuid,
    pub plugin_name: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub user_id: Uuid,
    pub feed_id: Option<Uuid>,
    /// Knowledge bases the run may write to through the kb capability.
    #[serde(default)]
    pub kb_grants: Vec<Uuid>,
    pub status: PluginExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PluginExecution {
    pub fn new(
        plugin_name: impl Into<String>,
        operation: impl Into<String>,
        params: serde_json::Value,
        user_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin_name: plugin_name.into(),
            operation: operation.into(),
            params,
            user_id,
            feed_id: None,
            kb_grants: Vec::new(),
            status: PluginExecutionStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            heartbeat_at: None,
            completed_at: None,
        }
    }

    pub fn for_feed(mut self, feed_id: Uuid) -> Self {
        self.feed_id = Some(feed_id);
        self
    }

    pub fn with_kb_grants(mut self, kb_ids: Vec<Uuid>) -> Self {
        self.kb_grants = kb_ids;
        self
    }

    /// Most recent sign of life: the heartbeat, or the start time before the
    /// first heartbeat lands.
    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.heartbeat_at.or(self.started_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginExecutionPayload {
    pub execution_id: Uuid,
}

impl JobPayload for PluginExecutionPayload {
    fn workload_type() -> WorkloadType {
        WorkloadType::PluginExecution
    }
}
