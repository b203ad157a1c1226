//! Collaborators the ingestion stages call out to.
//!
//! Real deployments back these with object storage, an OCR service, an
//! embedding model and an LLM. The [`crate::local`] module has process-local
//! versions for the standalone worker and tests.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shu_core::models::Document;

/// Where uploaded bytes are staged until extraction.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn fetch(&self, document: &Document) -> Result<Bytes>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    /// How the text was obtained, e.g. `"plain_text"` or `"ocr"`.
    pub method: String,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<Extraction>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per chunk, in input order.
    async fn embed(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Store a document's chunks, replacing any stored earlier.
    async fn store(
        &self,
        document_id: Uuid,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub synopsis: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait DocumentProfiler: Send + Sync {
    async fn profile(&self, document: &Document, text: &str) -> Result<Profile>;
}
