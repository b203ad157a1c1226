//! In-memory repositories backed by `tokio::sync::RwLock<HashMap>`.
//!
//! Cloning a repository shares the underlying map.

mod document;
mod execution;
mod feed;

pub use document::InMemoryDocumentRepository;
pub use execution::InMemoryPluginExecutionRepository;
pub use feed::InMemoryFeedRepository;
