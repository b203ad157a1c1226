use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use shu_core::models::{chrono_duration, Job};

use super::{QueueBackend, QueueResult};
use crate::routing::WorkloadRouting;

/// Ordering key within a queue: availability first, then insertion order.
type SlotKey = (DateTime<Utc>, u64);

#[derive(Debug, Clone)]
struct Lease {
    queue: String,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    waiting: HashMap<String, BTreeMap<SlotKey, Uuid>>,
    slots: HashMap<Uuid, (String, SlotKey)>,
    leases: HashMap<Uuid, Lease>,
    sequence: u64,
}

impl State {
    fn push_waiting(&mut self, job: Job) {
        self.sequence += 1;
        let key = (job.available_at, self.sequence);
        let queue = job.queue_name.clone();
        self.waiting
            .entry(queue.clone())
            .or_default()
            .insert(key, job.id);
        self.slots.insert(job.id, (queue, key));
        self.jobs.insert(job.id, job);
    }

    /// Detach a job from wherever it sits, returning the stored record.
    fn detach(&mut self, id: Uuid) -> Option<Job> {
        self.leases.remove(&id);
        if let Some((queue, key)) = self.slots.remove(&id) {
            if let Some(set) = self.waiting.get_mut(&queue) {
                set.remove(&key);
            }
        }
        self.jobs.remove(&id)
    }

    /// The stored record was delivered again after `job` was leased.
    fn is_stale(&self, job: &Job) -> bool {
        self.jobs
            .get(&job.id)
            .is_some_and(|stored| stored.attempts != job.attempts)
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Uuid> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(lease) = self.leases.remove(id) {
                tracing::warn!(job.id = %id, queue = %lease.queue, "Lease expired, job reclaimed");
            }
            if let Some(job) = self.jobs.remove(id) {
                self.push_waiting(job);
            }
        }
        expired.len()
    }

    fn lease_next(&mut self, queues: &[String], now: DateTime<Utc>) -> Option<Job> {
        self.reclaim_expired(now);

        for queue in queues {
            let Some(set) = self.waiting.get_mut(queue) else {
                continue;
            };
            let Some((&key, &id)) = set.iter().next() else {
                continue;
            };
            if key.0 > now {
                continue;
            }
            set.remove(&key);
            self.slots.remove(&id);

            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.attempts += 1;
            let deadline = now + chrono_duration(job.visibility_timeout());
            self.leases.insert(
                id,
                Lease {
                    queue: queue.clone(),
                    deadline,
                },
            );
            return Some(job.clone());
        }
        None
    }
}

/// Process-local queue backend.
///
/// Cloning shares the underlying state, so producers and workers in one process
/// can hold their own handle.
#[derive(Clone, Default)]
pub struct InMemoryQueueBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn dequeue_at(&self, queues: &[String], now: DateTime<Utc>) -> Option<Job> {
        self.state.lock().await.lease_next(queues, now)
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: Job) -> QueueResult<Job> {
        let mut state = self.state.lock().await;
        // Re-enqueueing a known id replaces the previous record.
        state.detach(job.id);
        state.push_waiting(job.clone());
        tracing::trace!(job.id = %job.id, queue = %job.queue_name, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self, queues: &[String]) -> QueueResult<Option<Job>> {
        Ok(self.dequeue_at(queues, Utc::now()).await)
    }

    async fn acknowledge(&self, job: &Job) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.is_stale(job) {
            tracing::debug!(job.id = %job.id, attempt = job.attempts, "Acknowledge from a stale delivery ignored");
            return Ok(());
        }
        if state.detach(job.id).is_none() {
            tracing::debug!(job.id = %job.id, "Acknowledge for unknown job ignored");
        }
        Ok(())
    }

    async fn extend_visibility(&self, job: &Job, extra: Duration) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if state.is_stale(job) {
            return Ok(false);
        }
        match state.leases.get_mut(&job.id) {
            Some(lease) => {
                lease.deadline = Utc::now() + chrono_duration(extra);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retry(&self, job: &Job, delay: Duration, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.is_stale(job) {
            tracing::debug!(job.id = %job.id, attempt = job.attempts, "Retry from a stale delivery ignored");
            return Ok(());
        }
        let mut record = state.detach(job.id).unwrap_or_else(|| job.clone());
        record.available_at = Utc::now() + chrono_duration(delay);
        record.last_error = Some(error.to_string());
        state.push_waiting(record);
        Ok(())
    }

    async fn dead_letter(&self, job: &Job, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.is_stale(job) {
            tracing::debug!(job.id = %job.id, attempt = job.attempts, "Dead-letter from a stale delivery ignored");
            return Ok(());
        }
        let mut record = state.detach(job.id).unwrap_or_else(|| job.clone());
        record.queue_name = WorkloadRouting::dead_letter_queue(&record.queue_name);
        record.available_at = Utc::now();
        record.last_error = Some(error.to_string());
        state.push_waiting(record);
        Ok(())
    }

    async fn queue_length(&self, queue: &str) -> QueueResult<usize> {
        let state = self.state.lock().await;
        Ok(state.waiting.get(queue).map_or(0, BTreeMap::len))
    }

    async fn leased_count(&self, queue: &str) -> QueueResult<usize> {
        let state = self.state.lock().await;
        Ok(state.leases.values().filter(|l| l.queue == queue).count())
    }

    async fn purge(&self, queue: &str) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let Some(set) = state.waiting.remove(queue) else {
            return Ok(0);
        };
        for id in set.values() {
            state.slots.remove(id);
            state.jobs.remove(id);
        }
        tracing::info!(queue = queue, purged = set.len(), "Queue purged");
        Ok(set.len())
    }

    async fn peek(&self, queue: &str, limit: usize) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        let jobs = state
            .waiting
            .get(queue)
            .into_iter()
            .flat_map(|set| set.values())
            .filter_map(|id| state.jobs.get(id).cloned())
            .take(limit)
            .collect();
        Ok(jobs)
    }
}
