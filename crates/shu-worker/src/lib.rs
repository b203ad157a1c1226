//! Job queue and worker pool.
//!
//! - [`backend`]: the [`QueueBackend`] abstraction with in-memory and Redis
//!   implementations.
//! - [`routing`]: maps logical workloads to physical queues.
//! - [`handler`]: the [`JobHandler`] trait and the registry the worker dispatches through.
//! - [`worker`]: the consumer loop with heartbeats, retries and dead-lettering.

pub mod backend;
pub mod handler;
pub mod routing;
pub mod worker;

pub use backend::{InMemoryQueueBackend, QueueBackend, QueueError, QueueResult};
#[cfg(feature = "redis-backend")]
pub use backend::RedisQueueBackend;
pub use handler::{HandlerRegistry, JobHandler};
pub use routing::{enqueue_workload, WorkloadRouting, WORKLOAD_PAYLOAD_KEY};
pub use worker::{compute_retry_backoff, Worker, WorkerConfig, WorkerStats, WorkerStatsSnapshot};
