//! Plugin system core infrastructure
//!
//! A plugin never touches storage, the network or credentials directly. Each
//! call gets a [`Host`] that exposes only the capabilities its manifest
//! declares, scoped to the plugin and the calling user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PluginError;
use crate::host::Host;
use crate::manifest::PluginManifest;

/// One invocation of a plugin operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCall {
    pub operation: String,
    pub params: serde_json::Value,
    pub user_id: Uuid,
    pub execution_id: Uuid,
}

/// Usage reported by a plugin, e.g. provider API units consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginUsage {
    pub unit_type: String,
    pub total_units: i64,
    pub raw_usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginOutput {
    pub data: serde_json::Value,
    pub usage: Option<PluginUsage>,
}

impl PluginOutput {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data, usage: None }
    }

    pub fn with_usage(mut self, usage: PluginUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Trait that all plugins must implement
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    fn name(&self) -> &str {
        &self.manifest().name
    }

    async fn execute(&self, call: PluginCall, host: &Host) -> Result<PluginOutput, PluginError>;
}
