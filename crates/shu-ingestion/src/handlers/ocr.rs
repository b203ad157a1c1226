use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;

use shu_core::models::{DocumentStatus, Job, WorkloadType};
use shu_core::JobError;
use shu_worker::JobHandler;

use super::StageContext;
use crate::traits::{SourceStore, TextExtractor};

/// First stage: pull the staged upload and extract its text.
pub struct OcrHandler {
    ctx: StageContext,
    sources: Arc<dyn SourceStore>,
    extractor: Arc<dyn TextExtractor>,
}

impl OcrHandler {
    pub fn new(
        ctx: StageContext,
        sources: Arc<dyn SourceStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            ctx,
            sources,
            extractor,
        }
    }
}

#[async_trait]
impl JobHandler for OcrHandler {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, document_id = tracing::field::Empty))]
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let (payload, mut document) = self.ctx.load(job).await?;
        tracing::Span::current().record("document_id", payload.document_id.to_string());

        match document.status {
            DocumentStatus::Error => {
                tracing::info!("Document already failed, skipping extraction");
                return Ok(());
            }
            // Text is persisted before the status moves to Embedding, so the
            // enqueue may be all that is missing.
            DocumentStatus::Embedding => {
                tracing::info!("Text already extracted, re-enqueueing embedding");
                return self.ctx.enqueue(WorkloadType::IngestionEmbed, &payload).await;
            }
            _ if document.is_past(DocumentStatus::Embedding) => {
                tracing::info!(status = %document.status, "Document past extraction, skipping");
                return Ok(());
            }
            _ => {}
        }

        self.ctx
            .documents
            .set_status(document.id, DocumentStatus::Extracting, None)
            .await
            .map_err(JobError::recoverable)?;

        let data = self
            .sources
            .fetch(&document)
            .await
            .map_err(|e| JobError::recoverable(e.context("Failed to fetch staged upload")))?;
        let extraction = self
            .extractor
            .extract(&data, &document.mime_type)
            .await
            .map_err(|e| JobError::recoverable(e.context("Text extraction failed")))?;

        if extraction.text.trim().is_empty() {
            return Err(JobError::unrecoverable(anyhow!(
                "no text extracted from {} ({})",
                document.title,
                document.mime_type
            )));
        }

        tracing::info!(
            method = %extraction.method,
            chars = extraction.text.chars().count(),
            "Text extracted"
        );
        document.status = DocumentStatus::Embedding;
        document.extracted_text = Some(extraction.text);
        document.extraction_method = Some(extraction.method);
        document.error_message = None;
        if document.processing_started_at.is_none() {
            document.processing_started_at = Some(chrono::Utc::now());
        }
        self.ctx
            .documents
            .update(document)
            .await
            .map_err(JobError::recoverable)?;

        self.ctx.enqueue(WorkloadType::IngestionEmbed, &payload).await
    }

    async fn on_dead_letter(&self, job: &Job, error: &JobError) {
        self.ctx.fail_document(job, error).await;
    }
}
