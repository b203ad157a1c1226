use anyhow::{Context, Result};
use std::sync::Arc;

use shu_core::models::{Document, DocumentStatus, IngestionPayload, Job, ProfilingStatus, WorkloadType};
use shu_core::IngestionSettings;
use shu_worker::{enqueue_workload, HandlerRegistry};

use crate::chunker::Chunker;
use crate::handlers::{EmbedHandler, OcrHandler, ProfilingHandler, StageContext};
use crate::local::{ExtractiveProfiler, HashingEmbedder, InMemoryChunkSink, InMemorySourceStore, PlainTextExtractor};
use crate::traits::{ChunkSink, DocumentProfiler, Embedder, SourceStore, TextExtractor};

/// Everything the stages call out to.
#[derive(Clone)]
pub struct IngestionCollaborators {
    pub sources: Arc<dyn SourceStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub sink: Arc<dyn ChunkSink>,
    pub profiler: Arc<dyn DocumentProfiler>,
}

impl IngestionCollaborators {
    pub fn local(sources: InMemorySourceStore, sink: InMemoryChunkSink) -> Self {
        Self {
            sources: Arc::new(sources),
            extractor: Arc::new(PlainTextExtractor),
            embedder: Arc::new(HashingEmbedder::default()),
            sink: Arc::new(sink),
            profiler: Arc::new(ExtractiveProfiler::default()),
        }
    }
}

/// Entry point for new documents, and wiring for the stage handlers.
#[derive(Clone)]
pub struct IngestionPipeline {
    ctx: StageContext,
    settings: IngestionSettings,
}

impl IngestionPipeline {
    pub fn new(ctx: StageContext, settings: IngestionSettings) -> Self {
        Self { ctx, settings }
    }

    /// Register the OCR, embed and profiling handlers.
    pub fn register_handlers(
        &self,
        registry: &mut HandlerRegistry,
        collaborators: IngestionCollaborators,
    ) {
        registry
            .register(
                WorkloadType::IngestionOcr,
                Arc::new(OcrHandler::new(
                    self.ctx.clone(),
                    collaborators.sources,
                    collaborators.extractor,
                )),
            )
            .register(
                WorkloadType::IngestionEmbed,
                Arc::new(EmbedHandler::new(
                    self.ctx.clone(),
                    Chunker::from_settings(&self.settings),
                    collaborators.embedder,
                    collaborators.sink,
                    self.settings.profiling_enabled,
                )),
            )
            .register(
                WorkloadType::Profiling,
                Arc::new(ProfilingHandler::new(self.ctx.clone(), collaborators.profiler)),
            );
    }

    /// Store the document as `Pending` (resetting it if it was ingested
    /// before) and enqueue the OCR stage.
    #[tracing::instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn submit(&self, mut document: Document) -> Result<Job> {
        document.status = DocumentStatus::Pending;
        document.extracted_text = None;
        document.extraction_method = None;
        document.chunk_count = 0;
        document.profiling_status = ProfilingStatus::NotStarted;
        document.synopsis = None;
        document.profile_metadata = None;
        document.error_message = None;
        document.processing_started_at = None;
        document.processed_at = None;

        let existing = self
            .ctx
            .documents
            .get(document.id)
            .await
            .context("Failed to look up document")?;
        let document = match existing {
            Some(_) => self.ctx.documents.update(document).await,
            None => self.ctx.documents.insert(document).await,
        }
        .context("Failed to store document")?;

        let payload = IngestionPayload {
            document_id: document.id,
            knowledge_base_id: document.knowledge_base_id,
        };
        let job = enqueue_workload(
            self.ctx.backend.as_ref(),
            &self.ctx.routing,
            WorkloadType::IngestionOcr,
            Job::payload_from(&payload)?,
        )
        .await
        .context("Failed to enqueue ingestion")?;
        tracing::info!(job.id = %job.id, "Document submitted for ingestion");
        Ok(job)
    }
}
