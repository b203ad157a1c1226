use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::HostScope;
use crate::error::PluginError;

/// A document-like record a plugin writes into a knowledge base, identified by
/// the plugin's own id for it (message id, event id) so re-syncs upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeObject {
    pub external_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait KnowledgeBaseWriter: Send + Sync {
    async fn upsert(
        &self,
        kb_id: Uuid,
        source_plugin: &str,
        object: KnowledgeObject,
    ) -> anyhow::Result<()>;

    async fn delete(&self, kb_id: Uuid, source_plugin: &str, external_id: &str)
        -> anyhow::Result<bool>;
}

#[derive(Clone, Default)]
pub struct InMemoryKnowledgeBase {
    objects: Arc<RwLock<HashMap<(Uuid, String, String), KnowledgeObject>>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects stored in `kb_id`, sorted by external id.
    pub async fn objects(&self, kb_id: Uuid) -> Vec<KnowledgeObject> {
        let mut objects: Vec<KnowledgeObject> = self
            .objects
            .read()
            .await
            .iter()
            .filter(|((kb, _, _), _)| *kb == kb_id)
            .map(|(_, obj)| obj.clone())
            .collect();
        objects.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        objects
    }
}

#[async_trait]
impl KnowledgeBaseWriter for InMemoryKnowledgeBase {
    async fn upsert(
        &self,
        kb_id: Uuid,
        source_plugin: &str,
        object: KnowledgeObject,
    ) -> anyhow::Result<()> {
        let key = (kb_id, source_plugin.to_string(), object.external_id.clone());
        self.objects.write().await.insert(key, object);
        Ok(())
    }

    async fn delete(
        &self,
        kb_id: Uuid,
        source_plugin: &str,
        external_id: &str,
    ) -> anyhow::Result<bool> {
        let key = (kb_id, source_plugin.to_string(), external_id.to_string());
        Ok(self.objects.write().await.remove(&key).is_some())
    }
}

/// Knowledge base writes, limited to the knowledge bases granted to the run.
#[derive(Clone)]
pub struct KbCapability {
    scope: Arc<HostScope>,
    grants: Arc<Vec<Uuid>>,
    writer: Arc<dyn KnowledgeBaseWriter>,
}

impl KbCapability {
    pub(crate) fn new(
        scope: Arc<HostScope>,
        grants: Vec<Uuid>,
        writer: Arc<dyn KnowledgeBaseWriter>,
    ) -> Self {
        Self {
            scope,
            grants: Arc::new(grants),
            writer,
        }
    }

    pub fn granted(&self) -> &[Uuid] {
        &self.grants
    }

    fn check_grant(&self, kb_id: Uuid) -> Result<(), PluginError> {
        if self.grants.contains(&kb_id) {
            Ok(())
        } else {
            tracing::warn!(plugin = %self.scope.plugin, kb_id = %kb_id, "Knowledge base write outside grant");
            Err(PluginError::KnowledgeBaseDenied(kb_id))
        }
    }

    pub async fn upsert_knowledge_object(
        &self,
        kb_id: Uuid,
        object: KnowledgeObject,
    ) -> Result<(), PluginError> {
        self.check_grant(kb_id)?;
        self.writer
            .upsert(kb_id, &self.scope.plugin, object)
            .await
            .map_err(PluginError::execution)
    }

    pub async fn delete_knowledge_object(
        &self,
        kb_id: Uuid,
        external_id: &str,
    ) -> Result<bool, PluginError> {
        self.check_grant(kb_id)?;
        self.writer
            .delete(kb_id, &self.scope.plugin, external_id)
            .await
            .map_err(PluginError::execution)
    }
}
