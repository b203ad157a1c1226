//! Shu plugin runtime
//!
//! Plugins declare a [`PluginManifest`] (operations, JSON schemas, capabilities)
//! and are run by the [`PluginExecutor`], which enforces schemas, rate limits,
//! quotas, timeouts and output caps. Host capabilities are injected per call
//! through [`Host`], and the [`PluginExecutionHandler`] ties executions to the
//! job queue.

pub mod error;
pub mod executor;
pub mod handler;
pub mod host;
pub mod manifest;
pub mod plugin;
pub mod registry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::PluginError;
pub use executor::{ExecutionOutcome, ExecutionRequest, ExecutorConfig, PluginExecutor};
pub use handler::PluginExecutionHandler;
pub use host::{
    AuthCapability, CacheCapability, Host, HostPolicy, HostScope, HostServices, HttpCapability,
    HttpResponse, InMemoryKeyValueStore, InMemoryKnowledgeBase, InMemorySecretStore,
    KbCapability, KeyValueStore, KnowledgeBaseWriter, KnowledgeObject, LogCapability,
    PluginCache, SecretStore, SecretsCapability, StaticTokenProvider, StorageCapability,
    TokenProvider,
};
pub use manifest::{Capability, CompiledSchema, OperationSpec, PluginManifest};
pub use plugin::{Plugin, PluginCall, PluginOutput, PluginUsage};
pub use registry::PluginRegistry;
