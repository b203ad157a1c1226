//! Plugin registry for managing available plugins

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::PluginError;
use crate::manifest::{CompiledSchema, PluginManifest};
use crate::plugin::Plugin;

/// Compiled contracts of one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationSchemas {
    pub input: Option<CompiledSchema>,
    pub output: Option<CompiledSchema>,
}

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    schemas: HashMap<String, OperationSchemas>,
}

/// Registry for managing and retrieving plugins.
///
/// Thread-safe and async-compatible using tokio's RwLock. Manifests are
/// validated and their schemas compiled once, at registration.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<RwLock<HashMap<String, RegisteredPlugin>>>,
    enabled: Arc<RwLock<HashMap<String, bool>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Re-registering a name replaces the plugin but keeps
    /// its enabled flag.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let manifest = plugin.manifest();
        manifest.validate()?;

        let mut schemas = HashMap::new();
        for op in &manifest.operations {
            let compile = |schema: &Option<serde_json::Value>| {
                schema
                    .as_ref()
                    .map(CompiledSchema::compile)
                    .transpose()
                    .map_err(PluginError::InvalidManifest)
            };
            schemas.insert(
                op.name.clone(),
                OperationSchemas {
                    input: compile(&op.input_schema)?,
                    output: compile(&op.output_schema)?,
                },
            );
        }

        let name = manifest.name.clone();
        let version = manifest.version.clone();

        let mut plugins = self.plugins.write().await;
        let mut enabled = self.enabled.write().await;
        if plugins
            .insert(name.clone(), RegisteredPlugin { plugin, schemas })
            .is_some()
        {
            tracing::warn!(plugin = %name, "Replacing registered plugin");
        }
        enabled.entry(name.clone()).or_insert(true);

        tracing::info!(plugin = %name, version = %version, "Plugin registered");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        let plugins = self.plugins.read().await;
        plugins
            .get(name)
            .map(|entry| entry.plugin.clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub async fn schemas(&self, name: &str, operation: &str) -> Option<OperationSchemas> {
        let plugins = self.plugins.read().await;
        plugins
            .get(name)
            .and_then(|entry| entry.schemas.get(operation).cloned())
    }

    /// Manifests of all registered plugins, sorted by name.
    pub async fn list(&self) -> Vec<PluginManifest> {
        let plugins = self.plugins.read().await;
        let mut manifests: Vec<PluginManifest> = plugins
            .values()
            .map(|entry| entry.plugin.manifest().clone())
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PluginError> {
        if !self.contains(name).await {
            return Err(PluginError::NotFound(name.to_string()));
        }
        self.enabled.write().await.insert(name.to_string(), enabled);
        tracing::info!(plugin = name, enabled, "Plugin enabled flag changed");
        Ok(())
    }

    /// Unknown plugins report `false`.
    pub async fn is_enabled(&self, name: &str) -> bool {
        self.enabled
            .read()
            .await
            .get(name)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::manifest::OperationSpec;
    use crate::plugin::{PluginCall, PluginOutput};
    use async_trait::async_trait;
    use serde_json::json;

    struct MockPlugin {
        manifest: PluginManifest,
    }

    impl MockPlugin {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                manifest: PluginManifest::new(name, "1.0.0").with_operation(
                    OperationSpec::new("run").with_input_schema(json!({"type": "object"})),
                ),
            })
        }
    }

    #[async_trait]
    impl Plugin for MockPlugin {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        async fn execute(&self, _call: PluginCall, _host: &Host) -> Result<PluginOutput, PluginError> {
            Ok(PluginOutput::new(json!({})))
        }
    }

    #[tokio::test]
    async fn test_new_registry_is_empty() {
        let registry = PluginRegistry::new();
        assert!(registry.list().await.is_empty());
        assert!(!registry.contains("test_plugin").await);
        assert!(!registry.is_enabled("test_plugin").await);
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = PluginRegistry::new();
        registry.register(MockPlugin::new("calendar")).await.unwrap();
        registry.register(MockPlugin::new("beta")).await.unwrap();

        assert!(registry.contains("calendar").await);
        assert!(registry.is_enabled("calendar").await);
        assert_eq!(registry.get("calendar").await.unwrap().name(), "calendar");

        let names: Vec<String> = registry.list().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["beta".to_string(), "calendar".to_string()]);

        let schemas = registry.schemas("calendar", "run").await.unwrap();
        assert!(schemas.input.is_some());
        assert!(schemas.output.is_none());
        assert!(registry.schemas("calendar", "missing").await.is_none());
    }

    #[tokio::test]
    async fn test_get_nonexistent_plugin() {
        let registry = PluginRegistry::new();
        let result = registry.get("nonexistent").await;
        assert!(matches!(result, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_manifest() {
        let registry = PluginRegistry::new();
        let plugin = Arc::new(MockPlugin {
            manifest: PluginManifest::new("empty", "1.0.0"),
        });
        assert!(matches!(
            registry.register(plugin).await,
            Err(PluginError::InvalidManifest(_))
        ));
        assert!(!registry.contains("empty").await);
    }

    #[tokio::test]
    async fn test_enable_disable_survives_reregistration() {
        let registry = PluginRegistry::new();
        registry.register(MockPlugin::new("gmail")).await.unwrap();

        registry.set_enabled("gmail", false).await.unwrap();
        assert!(!registry.is_enabled("gmail").await);

        registry.register(MockPlugin::new("gmail")).await.unwrap();
        assert!(!registry.is_enabled("gmail").await);

        assert!(registry.set_enabled("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn test_clone_registry_shares_state() {
        let registry = PluginRegistry::new();
        let cloned = registry.clone();
        registry.register(MockPlugin::new("gmail")).await.unwrap();
        assert!(cloned.contains("gmail").await);
    }
}
