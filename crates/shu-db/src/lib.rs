//! Shu record storage
//!
//! The queue core mutates three kinds of domain records: documents, plugin
//! executions and plugin feeds. This crate defines the repository traits the
//! handlers depend on, plus `memory` implementations used by tests and by the
//! standalone worker.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::{DbError, DbResult};
pub use memory::{InMemoryDocumentRepository, InMemoryFeedRepository, InMemoryPluginExecutionRepository};
pub use repository::{DocumentRepository, FeedRepository, PluginExecutionRepository};
