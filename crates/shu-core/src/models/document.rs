use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::{JobPayload, WorkloadType};

/// Processing state of an ingested document.
///
/// The pipeline moves forward only: `Pending -> Extracting -> Embedding ->
/// Profiling -> Processed`, with `Profiling` skipped when profiling is off.
/// Any non-terminal state may fall to `Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Embedding,
    Profiling,
    Processed,
    Error,
}

impl DocumentStatus {
    /// Position in the pipeline, used to make stage handlers idempotent.
    pub fn stage_rank(&self) -> u8 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Extracting => 1,
            DocumentStatus::Embedding => 2,
            DocumentStatus::Profiling => 3,
            DocumentStatus::Processed => 4,
            DocumentStatus::Error => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Error)
    }
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Extracting => write!(f, "extracting"),
            DocumentStatus::Embedding => write!(f, "embedding"),
            DocumentStatus::Profiling => write!(f, "profiling"),
            DocumentStatus::Processed => write!(f, "processed"),
            DocumentStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "extracting" => Ok(DocumentStatus::Extracting),
            "embedding" => Ok(DocumentStatus::Embedding),
            "profiling" => Ok(DocumentStatus::Profiling),
            "processed" => Ok(DocumentStatus::Processed),
            "error" => Ok(DocumentStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid document status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfilingStatus {
    #[default]
    NotStarted,
    Pending,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub title: String,
    pub source_uri: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    pub extraction_method: Option<String>,
    pub chunk_count: usize,
    pub profiling_status: ProfilingStatus,
    pub synopsis: Option<String>,
    /// Structured output of the profiling stage (topics, language, ...).
    #[serde(default)]
    pub profile_metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        knowledge_base_id: Uuid,
        title: impl Into<String>,
        source_uri: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            knowledge_base_id,
            title: title.into(),
            source_uri: source_uri.into(),
            mime_type: mime_type.into(),
            status: DocumentStatus::Pending,
            extracted_text: None,
            extraction_method: None,
            chunk_count: 0,
            profiling_status: ProfilingStatus::NotStarted,
            synopsis: None,
            profile_metadata: None,
            error_message: None,
            processing_started_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the document has moved beyond `status` in the pipeline.
    pub fn is_past(&self, status: DocumentStatus) -> bool {
        self.status != DocumentStatus::Error && self.status.stage_rank() > status.stage_rank()
    }
}

/// Payload shared by the three ingestion stages. It is typed against the entry
/// stage; embed and profiling jobs carry the same shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionPayload {
    pub document_id: Uuid,
    pub knowledge_base_id: Uuid,
}

impl JobPayload for IngestionPayload {
    fn workload_type() -> WorkloadType {
        WorkloadType::IngestionOcr
    }
}
