//! Queue backends.
//!
//! A job moves between three places: the waiting set of its queue, the lease
//! table while a worker holds it, and (when given up on) the dead-letter queue.
//! Implementations keep each job in exactly one of them.

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use shu_core::models::Job;

pub use memory::InMemoryQueueBackend;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisQueueBackend;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command failed: {0}")]
    Command(String),

    #[error("job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    NotFound(uuid::Uuid),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Delivery is at-least-once. The job passed to `acknowledge`,
/// `extend_visibility`, `retry` and `dead_letter` identifies one delivery by its
/// `attempts`: if the job has since been leased again, the call leaves the
/// newer delivery alone (`extend_visibility` reports `false`).
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a job on `job.queue_name`. It becomes deliverable at `job.available_at`.
    async fn enqueue(&self, job: Job) -> QueueResult<Job>;

    /// Lease the first available job, scanning `queues` in order.
    ///
    /// Expired leases are reclaimed first. The returned job has its delivery
    /// count incremented and is hidden for its visibility timeout.
    async fn dequeue(&self, queues: &[String]) -> QueueResult<Option<Job>>;

    /// Remove a job permanently. Unknown ids are ignored.
    async fn acknowledge(&self, job: &Job) -> QueueResult<()>;

    /// Push the lease deadline to `now + extra`. Returns `false` if the lease was lost.
    async fn extend_visibility(&self, job: &Job, extra: Duration) -> QueueResult<bool>;

    /// Release the lease and make the job deliverable again after `delay`.
    async fn retry(&self, job: &Job, delay: Duration, error: &str) -> QueueResult<()>;

    /// Release the lease and park the job on its dead-letter queue.
    async fn dead_letter(&self, job: &Job, error: &str) -> QueueResult<()>;

    /// Jobs waiting on `queue`, excluding leased ones.
    async fn queue_length(&self, queue: &str) -> QueueResult<usize>;

    /// Jobs from `queue` currently leased by a worker.
    async fn leased_count(&self, queue: &str) -> QueueResult<usize>;

    /// Drop every waiting job on `queue` and return how many were removed.
    async fn purge(&self, queue: &str) -> QueueResult<usize>;

    /// Waiting jobs in delivery order, without leasing them.
    async fn peek(&self, queue: &str, limit: usize) -> QueueResult<Vec<Job>>;
}
