pub mod document;
pub mod feed;
pub mod job;
pub mod plugin_execution;
pub mod workload;

pub use document::*;
pub use feed::*;
pub use job::*;
pub use plugin_execution::*;
pub use workload::*;
