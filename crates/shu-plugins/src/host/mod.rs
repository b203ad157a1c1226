//! Host capabilities handed to plugins.
//!
//! A [`Host`] is built per execution from the plugin's manifest. Only declared
//! capabilities are present; asking for any other one fails with
//! [`PluginError::CapabilityDenied`].

mod auth;
mod cache;
mod egress;
mod http;
mod kb;
mod log;
mod secrets;
mod storage;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use shu_core::PluginSettings;

use crate::error::PluginError;
use crate::manifest::{Capability, PluginManifest};

pub use auth::{AuthCapability, StaticTokenProvider, TokenProvider};
pub use cache::{CacheCapability, PluginCache};
pub use http::{HttpCapability, HttpResponse};
pub use kb::{InMemoryKnowledgeBase, KbCapability, KnowledgeBaseWriter, KnowledgeObject};
pub use log::LogCapability;
pub use secrets::{InMemorySecretStore, SecretStore, SecretsCapability};
pub use storage::{InMemoryKeyValueStore, KeyValueStore, StorageCapability};

/// Who is calling: shared by every capability of one execution.
#[derive(Debug, Clone)]
pub struct HostScope {
    pub plugin: String,
    pub user_id: Uuid,
    pub execution_id: Uuid,
}

/// Egress settings for the http capability.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    /// Domains (and their subdomains) plugins may reach. `None` allows any public host.
    pub http_allowlist: Option<Vec<String>>,
    pub allow_private_ips: bool,
    pub max_response_bytes: usize,
    pub http_timeout: Duration,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self::from_settings(&PluginSettings::default())
    }
}

impl HostPolicy {
    pub fn from_settings(settings: &PluginSettings) -> Self {
        Self {
            http_allowlist: settings.http_allowlist.clone(),
            allow_private_ips: settings.http_allow_private_ips,
            max_response_bytes: settings.http_max_response_bytes,
            http_timeout: Duration::from_secs(settings.http_timeout_secs.max(1)),
        }
    }
}

/// Backing services behind the capabilities.
#[derive(Clone)]
pub struct HostServices {
    pub secrets: Arc<dyn SecretStore>,
    pub storage: Arc<dyn KeyValueStore>,
    pub knowledge: Arc<dyn KnowledgeBaseWriter>,
    pub tokens: Arc<dyn TokenProvider>,
    pub cache: PluginCache,
    pub http_client: reqwest::Client,
}

impl HostServices {
    /// Process-local services: in-memory stores and a fresh HTTP client.
    pub fn in_memory(cache_capacity: usize) -> Self {
        Self {
            secrets: Arc::new(InMemorySecretStore::new()),
            storage: Arc::new(InMemoryKeyValueStore::new()),
            knowledge: Arc::new(InMemoryKnowledgeBase::new()),
            tokens: Arc::new(StaticTokenProvider::new()),
            cache: PluginCache::new(cache_capacity),
            http_client: default_http_client(),
        }
    }
}

/// Redirects are not followed: a redirect target would skip the egress check.
pub fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

pub struct Host {
    scope: Arc<HostScope>,
    http: Option<HttpCapability>,
    secrets: Option<SecretsCapability>,
    storage: Option<StorageCapability>,
    kb: Option<KbCapability>,
    auth: Option<AuthCapability>,
    cache: Option<CacheCapability>,
    log: Option<LogCapability>,
}

impl Host {
    pub fn build(
        manifest: &PluginManifest,
        user_id: Uuid,
        execution_id: Uuid,
        kb_grants: Vec<Uuid>,
        services: &HostServices,
        policy: Arc<HostPolicy>,
    ) -> Self {
        let scope = Arc::new(HostScope {
            plugin: manifest.name.clone(),
            user_id,
            execution_id,
        });
        let declared = |c| manifest.declares(c);

        Self {
            http: declared(Capability::Http).then(|| {
                HttpCapability::new(scope.clone(), services.http_client.clone(), policy.clone())
            }),
            secrets: declared(Capability::Secrets)
                .then(|| SecretsCapability::new(scope.clone(), services.secrets.clone())),
            storage: declared(Capability::Storage)
                .then(|| StorageCapability::new(&scope, services.storage.clone())),
            kb: declared(Capability::Kb).then(|| {
                KbCapability::new(scope.clone(), kb_grants.clone(), services.knowledge.clone())
            }),
            auth: declared(Capability::Auth)
                .then(|| AuthCapability::new(scope.clone(), services.tokens.clone())),
            cache: declared(Capability::Cache).then(|| services.cache.scoped(&scope.plugin)),
            log: declared(Capability::Log).then(|| LogCapability::new(scope.clone())),
            scope,
        }
    }

    pub fn scope(&self) -> &HostScope {
        &self.scope
    }

    fn require<'a, T>(&self, cap: &'a Option<T>, capability: Capability) -> Result<&'a T, PluginError> {
        cap.as_ref().ok_or_else(|| {
            tracing::warn!(
                plugin = %self.scope.plugin,
                capability = %capability,
                "Plugin requested an undeclared capability"
            );
            PluginError::CapabilityDenied {
                plugin: self.scope.plugin.clone(),
                capability,
            }
        })
    }

    pub fn http(&self) -> Result<&HttpCapability, PluginError> {
        self.require(&self.http, Capability::Http)
    }

    pub fn secrets(&self) -> Result<&SecretsCapability, PluginError> {
        self.require(&self.secrets, Capability::Secrets)
    }

    pub fn storage(&self) -> Result<&StorageCapability, PluginError> {
        self.require(&self.storage, Capability::Storage)
    }

    pub fn kb(&self) -> Result<&KbCapability, PluginError> {
        self.require(&self.kb, Capability::Kb)
    }

    pub fn auth(&self) -> Result<&AuthCapability, PluginError> {
        self.require(&self.auth, Capability::Auth)
    }

    pub fn cache(&self) -> Result<&CacheCapability, PluginError> {
        self.require(&self.cache, Capability::Cache)
    }

    pub fn log(&self) -> Result<&LogCapability, PluginError> {
        self.require(&self.log, Capability::Log)
    }
}
