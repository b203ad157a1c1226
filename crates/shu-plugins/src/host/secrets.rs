use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::HostScope;
use crate::error::PluginError;

/// Secret storage keyed by plugin, optional user and key.
///
/// `user_id = None` addresses the plugin-wide secret (e.g. an operator API key).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(
        &self,
        plugin: &str,
        user_id: Option<Uuid>,
        key: &str,
    ) -> anyhow::Result<Option<String>>;
}

#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<(String, Option<Uuid>, String), String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_plugin_secret(&self, plugin: &str, key: &str, value: impl Into<String>) {
        self.secrets
            .write()
            .await
            .insert((plugin.to_string(), None, key.to_string()), value.into());
    }

    pub async fn set_user_secret(
        &self,
        plugin: &str,
        user_id: Uuid,
        key: &str,
        value: impl Into<String>,
    ) {
        self.secrets
            .write()
            .await
            .insert((plugin.to_string(), Some(user_id), key.to_string()), value.into());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(
        &self,
        plugin: &str,
        user_id: Option<Uuid>,
        key: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .secrets
            .read()
            .await
            .get(&(plugin.to_string(), user_id, key.to_string()))
            .cloned())
    }
}

/// Secrets visible to one plugin call. Values are never logged.
#[derive(Clone)]
pub struct SecretsCapability {
    scope: Arc<HostScope>,
    store: Arc<dyn SecretStore>,
}

impl SecretsCapability {
    pub(crate) fn new(scope: Arc<HostScope>, store: Arc<dyn SecretStore>) -> Self {
        Self { scope, store }
    }

    /// The calling user's secret, falling back to the plugin-wide one.
    pub async fn get(&self, key: &str) -> Result<Option<String>, PluginError> {
        let plugin = self.scope.plugin.as_str();
        let user_secret = self
            .store
            .get_secret(plugin, Some(self.scope.user_id), key)
            .await
            .map_err(PluginError::execution)?;
        if user_secret.is_some() {
            return Ok(user_secret);
        }
        self.store
            .get_secret(plugin, None, key)
            .await
            .map_err(PluginError::execution)
    }

    /// Like [`get`](Self::get) but a missing secret is a permanent failure.
    pub async fn require(&self, key: &str) -> Result<String, PluginError> {
        self.get(key)
            .await?
            .ok_or_else(|| PluginError::Fatal(format!("secret '{}' is not configured", key)))
    }
}
