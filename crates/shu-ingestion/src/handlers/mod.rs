//! Job handlers for the three ingestion stages.
//!
//! Each stage checks the document's status before doing any work, so a job
//! redelivered after a crash either repeats an unfinished stage or only
//! re-enqueues the next one.

mod embed;
mod ocr;
mod profiling;

pub use embed::EmbedHandler;
pub use ocr::OcrHandler;
pub use profiling::ProfilingHandler;

use anyhow::anyhow;
use std::sync::Arc;

use shu_core::models::{Document, IngestionPayload, Job, WorkloadType};
use shu_core::{JobError, JobResultExt};
use shu_db::DocumentRepository;
use shu_worker::{enqueue_workload, QueueBackend, WorkloadRouting};

/// Document store and queue access shared by the stage handlers.
#[derive(Clone)]
pub struct StageContext {
    pub documents: Arc<dyn DocumentRepository>,
    pub backend: Arc<dyn QueueBackend>,
    pub routing: Arc<WorkloadRouting>,
}

impl StageContext {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        backend: Arc<dyn QueueBackend>,
        routing: Arc<WorkloadRouting>,
    ) -> Self {
        Self {
            documents,
            backend,
            routing,
        }
    }

    pub(crate) async fn load(&self, job: &Job) -> Result<(IngestionPayload, Document), JobError> {
        let payload: IngestionPayload = job.try_payload_as().unrecoverable()?;
        let document = self
            .documents
            .get(payload.document_id)
            .await
            .map_err(JobError::recoverable)?
            .ok_or_else(|| {
                JobError::unrecoverable(anyhow!("Document {} not found", payload.document_id))
            })?;
        Ok((payload, document))
    }

    pub(crate) async fn enqueue(
        &self,
        workload: WorkloadType,
        payload: &IngestionPayload,
    ) -> Result<(), JobError> {
        let value = Job::payload_from(payload).unrecoverable()?;
        let job = enqueue_workload(self.backend.as_ref(), &self.routing, workload, value)
            .await
            .map_err(JobError::recoverable)?;
        tracing::debug!(
            document_id = %payload.document_id,
            next.job.id = %job.id,
            workload = %workload,
            "Next ingestion stage enqueued"
        );
        Ok(())
    }

    /// Moves a document to `Error` unless it already reached a terminal state.
    pub(crate) async fn fail_document(&self, job: &Job, error: &JobError) {
        let Some(payload) = job.payload_as::<IngestionPayload>() else {
            return;
        };
        match self.documents.get(payload.document_id).await {
            Ok(Some(document)) if !document.status.is_terminal() => {
                if let Err(e) = self
                    .documents
                    .set_status(
                        document.id,
                        shu_core::models::DocumentStatus::Error,
                        Some(error.to_string()),
                    )
                    .await
                {
                    tracing::error!(document_id = %document.id, error = %e, "Failed to mark document as errored");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(document_id = %payload.document_id, error = %e, "Failed to load document")
            }
        }
    }
}
