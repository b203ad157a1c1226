use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;

use shu_core::models::{DocumentStatus, Job, ProfilingStatus, WorkloadType};
use shu_core::JobError;
use shu_worker::JobHandler;

use super::StageContext;
use crate::chunker::Chunker;
use crate::traits::{ChunkSink, Embedder};

/// Second stage: chunk the extracted text, embed the chunks and store them.
pub struct EmbedHandler {
    ctx: StageContext,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn ChunkSink>,
    profiling_enabled: bool,
}

impl EmbedHandler {
    pub fn new(
        ctx: StageContext,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn ChunkSink>,
        profiling_enabled: bool,
    ) -> Self {
        Self {
            ctx,
            chunker,
            embedder,
            sink,
            profiling_enabled,
        }
    }
}

#[async_trait]
impl JobHandler for EmbedHandler {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, document_id = tracing::field::Empty))]
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let (payload, mut document) = self.ctx.load(job).await?;
        tracing::Span::current().record("document_id", payload.document_id.to_string());

        match document.status {
            DocumentStatus::Error | DocumentStatus::Processed => {
                tracing::info!(status = %document.status, "Document finished, skipping embedding");
                return Ok(());
            }
            DocumentStatus::Profiling => {
                tracing::info!("Chunks already stored, re-enqueueing profiling");
                return self.ctx.enqueue(WorkloadType::Profiling, &payload).await;
            }
            _ => {}
        }

        let text = document.extracted_text.as_deref().ok_or_else(|| {
            JobError::unrecoverable(anyhow!(
                "Document {} has no extracted text to embed",
                document.id
            ))
        })?;

        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Err(JobError::unrecoverable(anyhow!(
                "Document {} produced no chunks",
                document.id
            )));
        }

        let embeddings = self
            .embedder
            .embed(&chunks)
            .await
            .map_err(|e| JobError::recoverable(e.context("Embedding failed")))?;
        if embeddings.len() != chunks.len() {
            return Err(JobError::recoverable(anyhow!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let chunk_count = chunks.len();
        self.sink
            .store(document.id, chunks, embeddings)
            .await
            .map_err(|e| JobError::recoverable(e.context("Failed to store chunks")))?;
        tracing::info!(chunk_count, "Chunks embedded and stored");

        document.chunk_count = chunk_count;
        if self.profiling_enabled {
            document.status = DocumentStatus::Profiling;
            document.profiling_status = ProfilingStatus::Pending;
            self.ctx
                .documents
                .update(document)
                .await
                .map_err(JobError::recoverable)?;
            self.ctx.enqueue(WorkloadType::Profiling, &payload).await
        } else {
            document.profiling_status = ProfilingStatus::Skipped;
            self.ctx
                .documents
                .update(document)
                .await
                .map_err(JobError::recoverable)?;
            self.ctx
                .documents
                .set_status(payload.document_id, DocumentStatus::Processed, None)
                .await
                .map_err(JobError::recoverable)?;
            tracing::info!("Document processed");
            Ok(())
        }
    }

    async fn on_dead_letter(&self, job: &Job, error: &JobError) {
        self.ctx.fail_document(job, error).await;
    }
}
