//! Process-local collaborators for the standalone worker and tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shu_core::models::Document;

use crate::traits::{ChunkSink, DocumentProfiler, Embedder, Extraction, Profile, SourceStore, TextExtractor};

/// Staged uploads keyed by `source_uri`.
#[derive(Clone, Default)]
pub struct InMemorySourceStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, source_uri: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(source_uri.into(), data.into());
    }
}

#[async_trait]
impl SourceStore for InMemorySourceStore {
    async fn fetch(&self, document: &Document) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(&document.source_uri)
            .cloned()
            .ok_or_else(|| anyhow!("No staged upload at {}", document.source_uri))
    }
}

/// Decodes text-like uploads. Binary formats would need real OCR, so they
/// come back empty and the OCR stage rejects them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn is_textual(mime_type: &str) -> bool {
        let mime = mime_type.to_ascii_lowercase();
        mime.starts_with("text/")
            || matches!(
                mime.as_str(),
                "application/json" | "application/xml" | "application/x-yaml"
            )
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<Extraction> {
        if !Self::is_textual(mime_type) {
            tracing::warn!(mime_type = %mime_type, "No local extractor for this format");
            return Ok(Extraction {
                text: String::new(),
                method: "unsupported".to_string(),
            });
        }
        Ok(Extraction {
            text: String::from_utf8_lossy(data).into_owned(),
            method: "plain_text".to_string(),
        })
    }
}

/// Deterministic bag-of-bytes vectors. Stable across runs, which is all the
/// local pipeline needs.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimensions];
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % self.dimensions] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(chunks.iter().map(|c| self.vector(c)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Default)]
pub struct InMemoryChunkSink {
    chunks: Arc<RwLock<HashMap<Uuid, Vec<StoredChunk>>>>,
}

impl InMemoryChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunks(&self, document_id: Uuid) -> Vec<StoredChunk> {
        self.chunks
            .read()
            .await
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChunkSink for InMemoryChunkSink {
    async fn store(
        &self,
        document_id: Uuid,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(anyhow!(
                "Got {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            ));
        }
        let stored = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| StoredChunk { text, embedding })
            .collect();
        self.chunks.write().await.insert(document_id, stored);
        Ok(())
    }
}

/// Synopsis from the leading sentences, plus simple text statistics.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveProfiler {
    max_synopsis_chars: usize,
}

impl ExtractiveProfiler {
    pub fn new(max_synopsis_chars: usize) -> Self {
        Self {
            max_synopsis_chars: max_synopsis_chars.max(16),
        }
    }
}

impl Default for ExtractiveProfiler {
    fn default() -> Self {
        Self::new(280)
    }
}

#[async_trait]
impl DocumentProfiler for ExtractiveProfiler {
    async fn profile(&self, document: &Document, text: &str) -> Result<Profile> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut synopsis = String::new();
        for sentence in normalized.split_inclusive(['.', '!', '?']) {
            if !synopsis.is_empty()
                && synopsis.chars().count() + sentence.chars().count() > self.max_synopsis_chars
            {
                break;
            }
            synopsis.push_str(sentence);
        }
        if synopsis.chars().count() > self.max_synopsis_chars {
            synopsis = synopsis.chars().take(self.max_synopsis_chars).collect();
        }

        Ok(Profile {
            synopsis: synopsis.trim().to_string(),
            metadata: json!({
                "title": document.title,
                "word_count": normalized.split(' ').filter(|w| !w.is_empty()).count(),
                "char_count": text.chars().count(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let extracted = PlainTextExtractor.extract(b"hello", "text/plain").await.unwrap();
        assert_eq!(extracted.text, "hello");
        assert_eq!(extracted.method, "plain_text");

        let pdf = PlainTextExtractor
            .extract(b"%PDF-1.7", "application/pdf")
            .await
            .unwrap();
        assert!(pdf.text.is_empty());
    }

    #[tokio::test]
    async fn test_embeddings_are_normalized_and_stable() {
        let embedder = HashingEmbedder::new(8);
        let chunks = vec!["abc".to_string(), "abc".to_string(), "xyz".to_string()];
        let vectors = embedder.embed(&chunks).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[1]);
        assert_ne!(vectors[0], vectors[2]);
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_chunk_sink_replaces_and_checks_lengths() {
        let sink = InMemoryChunkSink::new();
        let id = Uuid::new_v4();
        sink.store(id, vec!["a".into(), "b".into()], vec![vec![1.0], vec![2.0]])
            .await
            .unwrap();
        sink.store(id, vec!["c".into()], vec![vec![3.0]]).await.unwrap();
        let stored = sink.chunks(id).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "c");

        assert!(sink.store(id, vec!["d".into()], vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_profiler_takes_leading_sentences() {
        let doc = Document::new(Uuid::new_v4(), "notes", "mem://notes", "text/plain");
        let text = "First point.  Second   point! ".to_string() + &"filler ".repeat(100);
        let profile = ExtractiveProfiler::new(40).profile(&doc, &text).await.unwrap();
        assert_eq!(profile.synopsis, "First point. Second point!");
        assert_eq!(profile.metadata["title"], "notes");
        assert_eq!(profile.metadata["word_count"], 104);
    }

    #[tokio::test]
    async fn test_missing_upload() {
        let store = InMemorySourceStore::new();
        let doc = Document::new(Uuid::new_v4(), "a", "mem://a", "text/plain");
        assert!(store.fetch(&doc).await.is_err());
        store.put("mem://a", "data").await;
        assert_eq!(store.fetch(&doc).await.unwrap(), Bytes::from("data"));
    }
}
