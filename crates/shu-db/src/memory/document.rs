use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shu_core::models::{Document, DocumentStatus};

use crate::{DbError, DbResult, DocumentRepository};

#[derive(Clone, Default)]
pub struct InMemoryDocumentRepository {
    documents: Arc<RwLock<HashMap<Uuid, Document>>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn insert(&self, document: Document) -> DbResult<Document> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id) {
            return Err(DbError::Conflict {
                entity: "document",
                id: document.id,
            });
        }
        documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Document>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn update(&self, mut document: Document) -> DbResult<Document> {
        let mut documents = self.documents.write().await;
        let slot = documents.get_mut(&document.id).ok_or(DbError::NotFound {
            entity: "document",
            id: document.id,
        })?;
        document.updated_at = Utc::now();
        *slot = document.clone();
        Ok(document)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> DbResult<Document> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(DbError::NotFound {
            entity: "document",
            id,
        })?;
        let now = Utc::now();
        document.status = status;
        if error_message.is_some() {
            document.error_message = error_message;
        }
        if status == DocumentStatus::Extracting && document.processing_started_at.is_none() {
            document.processing_started_at = Some(now);
        }
        if status == DocumentStatus::Processed {
            document.processed_at = Some(now);
        }
        document.updated_at = now;
        tracing::debug!(document_id = %id, status = %status, "Document status updated");
        Ok(document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(Uuid::new_v4(), "notes.txt", "file://notes.txt", "text/plain")
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = InMemoryDocumentRepository::new();
        let d = repo.insert(doc()).await.unwrap();
        assert_eq!(repo.get(d.id).await.unwrap(), Some(d.clone()));
        assert!(matches!(
            repo.insert(d).await,
            Err(DbError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_status_tracks_timestamps() {
        let repo = InMemoryDocumentRepository::new();
        let d = repo.insert(doc()).await.unwrap();

        let extracting = repo
            .set_status(d.id, DocumentStatus::Extracting, None)
            .await
            .unwrap();
        assert!(extracting.processing_started_at.is_some());
        assert!(extracting.processed_at.is_none());

        let done = repo
            .set_status(d.id, DocumentStatus::Processed, None)
            .await
            .unwrap();
        assert!(done.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_set_status_keeps_error_when_none_given() {
        let repo = InMemoryDocumentRepository::new();
        let d = repo.insert(doc()).await.unwrap();
        repo.set_status(d.id, DocumentStatus::Error, Some("boom".to_string()))
            .await
            .unwrap();
        let again = repo
            .set_status(d.id, DocumentStatus::Error, None)
            .await
            .unwrap();
        assert_eq!(again.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let repo = InMemoryDocumentRepository::new();
        assert!(matches!(
            repo.update(doc()).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
