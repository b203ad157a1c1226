use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::HostScope;
use crate::error::PluginError;

/// Access tokens for third-party providers a user has connected.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, user_id: Uuid, provider: &str) -> anyhow::Result<Option<String>>;
}

/// Tokens registered up front, for tests and the standalone worker.
#[derive(Clone, Default)]
pub struct StaticTokenProvider {
    tokens: Arc<RwLock<HashMap<(Uuid, String), String>>>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: Uuid, provider: &str, token: impl Into<String>) {
        self.tokens
            .write()
            .await
            .insert((user_id, provider.to_string()), token.into());
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, user_id: Uuid, provider: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(user_id, provider.to_string()))
            .cloned())
    }
}

#[derive(Clone)]
pub struct AuthCapability {
    scope: Arc<HostScope>,
    provider: Arc<dyn TokenProvider>,
}

impl AuthCapability {
    pub(crate) fn new(scope: Arc<HostScope>, provider: Arc<dyn TokenProvider>) -> Self {
        Self { scope, provider }
    }

    /// The calling user's token for `provider`. A user who never connected the
    /// provider fails permanently.
    pub async fn provider_token(&self, provider: &str) -> Result<String, PluginError> {
        self.provider
            .access_token(self.scope.user_id, provider)
            .await
            .map_err(PluginError::execution)?
            .ok_or_else(|| {
                PluginError::Fatal(format!(
                    "user {} has not connected {}",
                    self.scope.user_id, provider
                ))
            })
    }
}
