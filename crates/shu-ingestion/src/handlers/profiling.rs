use async_trait::async_trait;
use std::sync::Arc;

use shu_core::models::{DocumentStatus, IngestionPayload, Job, ProfilingStatus};
use shu_core::JobError;
use shu_worker::JobHandler;

use super::StageContext;
use crate::traits::DocumentProfiler;

/// Last stage: synopsis and metadata. A document whose profiling gives up is
/// still `Processed`, only its `profiling_status` records the failure.
pub struct ProfilingHandler {
    ctx: StageContext,
    profiler: Arc<dyn DocumentProfiler>,
}

impl ProfilingHandler {
    pub fn new(ctx: StageContext, profiler: Arc<dyn DocumentProfiler>) -> Self {
        Self { ctx, profiler }
    }
}

#[async_trait]
impl JobHandler for ProfilingHandler {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, document_id = tracing::field::Empty))]
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let (payload, mut document) = self.ctx.load(job).await?;
        tracing::Span::current().record("document_id", payload.document_id.to_string());

        if document.status.is_terminal() {
            tracing::info!(status = %document.status, "Document finished, skipping profiling");
            return Ok(());
        }

        let text = document.extracted_text.clone().unwrap_or_default();
        let profile = self
            .profiler
            .profile(&document, &text)
            .await
            .map_err(|e| JobError::recoverable(e.context("Profiling failed")))?;

        document.synopsis = Some(profile.synopsis);
        document.profile_metadata = Some(profile.metadata);
        document.profiling_status = ProfilingStatus::Complete;
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
        tracing::info!("Document profiled and processed");
        Ok(())
    }

    async fn on_dead_letter(&self, job: &Job, error: &JobError) {
        let Some(payload) = job.payload_as::<IngestionPayload>() else {
            return;
        };
        let document = match self.ctx.documents.get(payload.document_id).await {
            Ok(Some(document)) if !document.status.is_terminal() => document,
            Ok(_) => return,
            Err(e) => {
                tracing::error!(document_id = %payload.document_id, error = %e, "Failed to load document");
                return;
            }
        };

        tracing::warn!(document_id = %document.id, error = %error, "Profiling gave up, finishing document without a profile");
        let mut document = document;
        document.profiling_status = ProfilingStatus::Failed;
        let result = match self.ctx.documents.update(document).await {
            Ok(_) => {
                self.ctx
                    .documents
                    .set_status(payload.document_id, DocumentStatus::Processed, None)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(document_id = %payload.document_id, error = %e, "Failed to record profiling failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::Fixture;
    use crate::local::ExtractiveProfiler;
    use crate::traits::Profile;
    use shu_core::models::{Document, WorkloadType};

    struct BrokenProfiler;

    #[async_trait]
    impl DocumentProfiler for BrokenProfiler {
        async fn profile(&self, _document: &Document, _text: &str) -> anyhow::Result<Profile> {
            Err(anyhow::anyhow!("LLM unavailable"))
        }
    }

    #[tokio::test]
    async fn test_profile_completes_document() {
        let fx = Fixture::new();
        let doc = fx
            .document(DocumentStatus::Profiling, Some("Shu is a RAG backend. It has plugins."))
            .await;
        let handler = ProfilingHandler::new(fx.ctx.clone(), Arc::new(ExtractiveProfiler::default()));

        handler.handle(&fx.job(WorkloadType::Profiling, &doc)).await.unwrap();

        let stored = fx.reload(&doc).await;
        assert_eq!(stored.status, DocumentStatus::Processed);
        assert_eq!(stored.profiling_status, ProfilingStatus::Complete);
        assert_eq!(
            stored.synopsis.as_deref(),
            Some("Shu is a RAG backend. It has plugins.")
        );
        assert_eq!(stored.profile_metadata.unwrap()["word_count"], 8);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_profiler_error_is_retried() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Profiling, Some("text")).await;
        let handler = ProfilingHandler::new(fx.ctx.clone(), Arc::new(BrokenProfiler));

        let err = handler
            .handle(&fx.job(WorkloadType::Profiling, &doc))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(fx.reload(&doc).await.status, DocumentStatus::Profiling);
    }

    #[tokio::test]
    async fn test_dead_letter_still_processes_document() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Profiling, Some("text")).await;
        let handler = ProfilingHandler::new(fx.ctx.clone(), Arc::new(BrokenProfiler));

        handler
            .on_dead_letter(
                &fx.job(WorkloadType::Profiling, &doc),
                &JobError::recoverable(anyhow::anyhow!("LLM unavailable")),
            )
            .await;

        let stored = fx.reload(&doc).await;
        assert_eq!(stored.status, DocumentStatus::Processed);
        assert_eq!(stored.profiling_status, ProfilingStatus::Failed);
        assert!(stored.error_message.is_none());
        assert!(stored.synopsis.is_none());
    }

    #[tokio::test]
    async fn test_finished_document_is_skipped() {
        let fx = Fixture::new();
        let doc = fx.document(DocumentStatus::Error, Some("text")).await;
        let handler = ProfilingHandler::new(fx.ctx.clone(), Arc::new(BrokenProfiler));

        handler.handle(&fx.job(WorkloadType::Profiling, &doc)).await.unwrap();
        assert_eq!(fx.reload(&doc).await.status, DocumentStatus::Error);
    }
}
