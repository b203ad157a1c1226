//! Shu document ingestion
//!
//! Documents move through three queued stages: text extraction (OCR), chunk
//! embedding and profiling. Each stage is a [`shu_worker::JobHandler`] that
//! updates the [`shu_core::models::Document`] record and enqueues the next
//! stage through workload routing.

pub mod chunker;
pub mod handlers;
pub mod local;
pub mod pipeline;
pub mod traits;

pub use chunker::Chunker;
pub use handlers::{EmbedHandler, OcrHandler, ProfilingHandler, StageContext};
pub use local::{
    ExtractiveProfiler, HashingEmbedder, InMemoryChunkSink, InMemorySourceStore,
    PlainTextExtractor, StoredChunk,
};
pub use pipeline::{IngestionCollaborators, IngestionPipeline};
pub use traits::{ChunkSink, DocumentProfiler, Embedder, Extraction, Profile, SourceStore, TextExtractor};
