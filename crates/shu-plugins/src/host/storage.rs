use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::HostScope;
use crate::error::PluginError;

/// Key-value storage partitioned by namespace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, namespace: &str, key: &str, value: Value) -> anyhow::Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<bool>;

    /// Keys in `namespace` starting with `prefix`, sorted.
    async fn list(&self, namespace: &str, prefix: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<BTreeMap<(String, String), Value>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, namespace: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|(ns, key)| ns == namespace && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}

/// Persistent state for one plugin and user, e.g. sync cursors.
#[derive(Clone)]
pub struct StorageCapability {
    namespace: String,
    store: Arc<dyn KeyValueStore>,
}

impl StorageCapability {
    pub(crate) fn new(scope: &HostScope, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            namespace: format!("{}:{}", scope.plugin, scope.user_id),
            store,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, PluginError> {
        self.store
            .get(&self.namespace, key)
            .await
            .map_err(PluginError::execution)
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<(), PluginError> {
        self.store
            .put(&self.namespace, key, value)
            .await
            .map_err(PluginError::execution)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, PluginError> {
        self.store
            .delete(&self.namespace, key)
            .await
            .map_err(PluginError::execution)
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, PluginError> {
        self.store
            .list(&self.namespace, prefix)
            .await
            .map_err(PluginError::execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn scope(plugin: &str, user_id: Uuid) -> HostScope {
        HostScope {
            plugin: plugin.to_string(),
            user_id,
            execution_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_storage_is_namespaced() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let alice = Uuid::new_v4();
        let gmail_alice = StorageCapability::new(&scope("gmail", alice), store.clone());
        let gmail_bob = StorageCapability::new(&scope("gmail", Uuid::new_v4()), store.clone());
        let calendar_alice = StorageCapability::new(&scope("calendar", alice), store);

        gmail_alice.put("cursor", json!("abc")).await.unwrap();
        assert_eq!(gmail_alice.get("cursor").await.unwrap(), Some(json!("abc")));
        assert!(gmail_bob.get("cursor").await.unwrap().is_none());
        assert!(calendar_alice.get("cursor").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let storage = StorageCapability::new(&scope("gmail", Uuid::new_v4()), store);

        storage.put("sync:inbox", json!(1)).await.unwrap();
        storage.put("sync:sent", json!(2)).await.unwrap();
        storage.put("token", json!(3)).await.unwrap();

        assert_eq!(
            storage.list("sync:").await.unwrap(),
            vec!["sync:inbox".to_string(), "sync:sent".to_string()]
        );
        assert!(storage.delete("token").await.unwrap());
        assert!(!storage.delete("token").await.unwrap());
    }
}
