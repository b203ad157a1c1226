//! Built-in `notes` plugin, so a bare worker has something to schedule.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use shu_plugins::{
    Capability, Host, KnowledgeObject, OperationSpec, Plugin, PluginCall, PluginError,
    PluginManifest, PluginOutput, PluginUsage,
};

const RUNS_KEY: &str = "runs";

#[derive(Debug, Deserialize)]
struct Note {
    id: String,
    title: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    notes: Vec<Note>,
}

/// Copies the notes passed in `params` into every knowledge base the run was
/// granted, and counts runs per user in plugin storage.
pub struct NotesPlugin {
    manifest: PluginManifest,
}

impl NotesPlugin {
    pub fn new() -> Self {
        let manifest = PluginManifest::new("notes", "1.0.0")
            .with_description("Syncs inline notes into knowledge bases")
            .with_capability(Capability::Kb)
            .with_capability(Capability::Storage)
            .with_capability(Capability::Log)
            .with_operation(
                OperationSpec::new("sync")
                    .with_description("Upsert the given notes")
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {
                            "notes": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": {"type": "string", "minLength": 1},
                                        "title": {"type": "string"},
                                        "content": {"type": "string"}
                                    },
                                    "required": ["id", "title", "content"]
                                }
                            }
                        },
                        "required": ["notes"]
                    }))
                    .with_output_schema(json!({
                        "type": "object",
                        "properties": {
                            "synced": {"type": "integer", "minimum": 0},
                            "runs": {"type": "integer", "minimum": 1}
                        },
                        "required": ["synced", "runs"]
                    }))
                    .feed_allowed(true),
            );
        Self { manifest }
    }
}

impl Default for NotesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for NotesPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn execute(&self, call: PluginCall, host: &Host) -> Result<PluginOutput, PluginError> {
        let params: SyncParams = serde_json::from_value(call.params)
            .map_err(|e| PluginError::InvalidInput {
                errors: vec![e.to_string()],
            })?;
        let kb = host.kb()?;
        let storage = host.storage()?;
        let log = host.log()?;

        let mut synced = 0u64;
        for kb_id in kb.granted().to_vec() {
            for note in &params.notes {
                kb.upsert_knowledge_object(
                    kb_id,
                    KnowledgeObject {
                        external_id: note.id.clone(),
                        title: note.title.clone(),
                        content: note.content.clone(),
                        metadata: json!({"source": "notes"}),
                    },
                )
                .await?;
                synced += 1;
            }
        }

        let runs = storage
            .get(RUNS_KEY)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        storage.put(RUNS_KEY, json!(runs)).await?;
        log.info(&format!("Synced {} notes", synced));

        Ok(PluginOutput::new(json!({"synced": synced, "runs": runs})).with_usage(
            PluginUsage {
                unit_type: "objects".to_string(),
                total_units: i64::try_from(synced).unwrap_or(i64::MAX),
                raw_usage: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shu_plugins::{ExecutionRequest, ExecutorConfig, HostPolicy, HostServices, InMemoryKnowledgeBase, PluginExecutor, PluginRegistry};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sync_writes_granted_knowledge_bases() {
        let knowledge = InMemoryKnowledgeBase::new();
        let mut services = HostServices::in_memory(16);
        services.knowledge = Arc::new(knowledge.clone());
        let executor = PluginExecutor::new(
            PluginRegistry::new(),
            services,
            HostPolicy::default(),
            ExecutorConfig::default(),
        );
        executor.registry().register(Arc::new(NotesPlugin::new())).await.unwrap();

        let kb_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let request = |execution_id| ExecutionRequest {
            plugin: "notes".to_string(),
            operation: "sync".to_string(),
            params: json!({"notes": [
                {"id": "n1", "title": "One", "content": "first"},
                {"id": "n2", "title": "Two", "content": "second"}
            ]}),
            user_id,
            execution_id,
            kb_grants: vec![kb_id],
        };

        let first = executor.execute(request(Uuid::new_v4())).await.unwrap();
        assert_eq!(first.data, json!({"synced": 2, "runs": 1}));
        let second = executor.execute(request(Uuid::new_v4())).await.unwrap();
        assert_eq!(second.data["runs"], 2);

        let objects = knowledge.objects(kb_id).await;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].external_id, "n1");
    }

    #[tokio::test]
    async fn test_missing_notes_is_invalid_input() {
        let executor = PluginExecutor::new(
            PluginRegistry::new(),
            HostServices::in_memory(16),
            HostPolicy::default(),
            ExecutorConfig::default(),
        );
        executor.registry().register(Arc::new(NotesPlugin::new())).await.unwrap();

        let err = executor
            .execute(ExecutionRequest {
                plugin: "notes".to_string(),
                operation: "sync".to_string(),
                params: json!({}),
                user_id: Uuid::new_v4(),
                execution_id: Uuid::new_v4(),
                kb_grants: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidInput { .. }));
    }
}
