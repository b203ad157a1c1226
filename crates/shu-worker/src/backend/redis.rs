//! Redis queue backend.
//!
//! Layout, for a queue `q` and key prefix `p`:
//! - `q`: sorted set of waiting job ids scored by `available_at` (epoch millis)
//! - `q:leased`: sorted set of leased job ids scored by lease deadline
//! - `p:jobs`: hash of job id to job JSON
//! - `p:attempts`: hash of job id to delivery count
//!
//! Every transition that moves an id between sets runs as a Lua script.

use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::Utc;

use shu_core::models::{chrono_duration, Job};

use super::{QueueBackend, QueueError, QueueResult};
use crate::routing::WorkloadRouting;

const LEASED_SUFFIX: &str = ":leased";

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::Command(err.to_string())
        }
    }
}

struct Scripts {
    dequeue: Script,
    acknowledge: Script,
    extend: Script,
    retry: Script,
    dead_letter: Script,
    purge: Script,
}

/// Lua guard shared by the settling scripts: a call carrying an older delivery
/// count than the stored one belongs to a stale delivery and changes nothing.
/// Expects the attempts hash in `KEYS[2]`, the id in `ARGV[1]` and the caller's
/// delivery count in `ARGV[2]`.
const STALE_GUARD: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if current and tonumber(current) ~= tonumber(ARGV[2]) then
    return -1
end
"#;

impl Scripts {
    fn new() -> Self {
        Self {
            // KEYS: jobs, attempts, then (queue, leased) pairs. ARGV: now_ms.
            dequeue: Script::new(
                r#"
                local now = tonumber(ARGV[1])
                for i = 3, #KEYS, 2 do
                    local leased = KEYS[i + 1]
                    local expired = redis.call('ZRANGEBYSCORE', leased, '-inf', now)
                    for _, id in ipairs(expired) do
                        redis.call('ZREM', leased, id)
                        redis.call('ZADD', KEYS[i], now, id)
                    end
                end
                for i = 3, #KEYS, 2 do
                    local ids = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', now, 'LIMIT', 0, 1)
                    if #ids > 0 then
                        local id = ids[1]
                        redis.call('ZREM', KEYS[i], id)
                        local raw = redis.call('HGET', KEYS[1], id)
                        if raw then
                            local job = cjson.decode(raw)
                            local vis = tonumber(job['visibility_timeout_secs']) or 300
                            local attempts = redis.call('HINCRBY', KEYS[2], id, 1)
                            redis.call('ZADD', KEYS[i + 1], now + vis * 1000, id)
                            return {raw, attempts}
                        end
                    end
                end
                return false
                "#,
            ),
            // KEYS: jobs, attempts, queue, leased. ARGV: id, attempts.
            acknowledge: Script::new(&format!(
                r#"{}
                local removed = redis.call('ZREM', KEYS[4], ARGV[1])
                    + redis.call('ZREM', KEYS[3], ARGV[1])
                redis.call('HDEL', KEYS[1], ARGV[1])
                redis.call('HDEL', KEYS[2], ARGV[1])
                return removed
                "#,
                STALE_GUARD
            )),
            // KEYS: leased, attempts. ARGV: id, attempts, deadline_ms.
            extend: Script::new(&format!(
                r#"{}
                if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
                    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
                    return 1
                end
                return 0
                "#,
                STALE_GUARD
            )),
            // KEYS: jobs, attempts, queue, leased. ARGV: id, attempts, job_json, available_ms.
            retry: Script::new(&format!(
                r#"{}
                redis.call('ZREM', KEYS[4], ARGV[1])
                redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
                redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
                return 1
                "#,
                STALE_GUARD
            )),
            // KEYS: jobs, attempts, queue, leased, dead. ARGV: id, attempts, job_json, now_ms.
            dead_letter: Script::new(&format!(
                r#"{}
                redis.call('ZREM', KEYS[4], ARGV[1])
                redis.call('ZREM', KEYS[3], ARGV[1])
                redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
                redis.call('ZADD', KEYS[5], ARGV[4], ARGV[1])
                return 1
                "#,
                STALE_GUARD
            )),
            // KEYS: jobs, attempts, queue.
            purge: Script::new(
                r#"
                local ids = redis.call('ZRANGE', KEYS[3], 0, -1)
                for _, id in ipairs(ids) do
                    redis.call('HDEL', KEYS[1], id)
                    redis.call('HDEL', KEYS[2], id)
                end
                redis.call('DEL', KEYS[3])
                return #ids
                "#,
            ),
        }
    }
}

/// Queue backend shared across processes through Redis.
#[derive(Clone)]
pub struct RedisQueueBackend {
    conn: ConnectionManager,
    jobs_key: String,
    attempts_key: String,
    scripts: Arc<Scripts>,
}

impl RedisQueueBackend {
    pub async fn connect(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| QueueError::Connection(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(prefix = prefix, "Connected Redis queue backend");
        Ok(Self::with_connection(conn, prefix))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            jobs_key: format!("{}:jobs", prefix),
            attempts_key: format!("{}:attempts", prefix),
            scripts: Arc::new(Scripts::new()),
        }
    }

    fn leased_key(queue: &str) -> String {
        format!("{}{}", queue, LEASED_SUFFIX)
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, job: Job) -> QueueResult<Job> {
        let raw = serde_json::to_string(&job)?;
        let id = job.id.to_string();
        let mut conn = self.conn.clone();
        ::redis::pipe()
            .atomic()
            .hset(&self.jobs_key, &id, raw)
            .ignore()
            .hset(&self.attempts_key, &id, job.attempts)
            .ignore()
            .zadd(&job.queue_name, &id, job.available_at.timestamp_millis())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        tracing::trace!(job.id = %job.id, queue = %job.queue_name, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self, queues: &[String]) -> QueueResult<Option<Job>> {
        if queues.is_empty() {
            return Ok(None);
        }
        let mut invocation = self.scripts.dequeue.key(&self.jobs_key);
        invocation.key(&self.attempts_key);
        for queue in queues {
            invocation.key(queue).key(Self::leased_key(queue));
        }
        invocation.arg(Utc::now().timestamp_millis());

        let mut conn = self.conn.clone();
        let leased: Option<(String, u32)> = invocation.invoke_async(&mut conn).await?;
        let Some((raw, attempts)) = leased else {
            return Ok(None);
        };
        let mut job: Job = serde_json::from_str(&raw)?;
        job.attempts = attempts;
        Ok(Some(job))
    }

    async fn acknowledge(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let removed: i32 = self
            .scripts
            .acknowledge
            .key(&self.jobs_key)
            .key(&self.attempts_key)
            .key(&job.queue_name)
            .key(Self::leased_key(&job.queue_name))
            .arg(job.id.to_string())
            .arg(job.attempts)
            .invoke_async(&mut conn)
            .await?;
        match removed {
            -1 => {
                tracing::debug!(job.id = %job.id, attempt = job.attempts, "Acknowledge from a stale delivery ignored")
            }
            0 => tracing::debug!(job.id = %job.id, "Acknowledge for unknown job ignored"),
            _ => {}
        }
        Ok(())
    }

    async fn extend_visibility(&self, job: &Job, extra: Duration) -> QueueResult<bool> {
        let deadline = Utc::now() + chrono_duration(extra);
        let mut conn = self.conn.clone();
        let extended: i32 = self
            .scripts
            .extend
            .key(Self::leased_key(&job.queue_name))
            .key(&self.attempts_key)
            .arg(job.id.to_string())
            .arg(job.attempts)
            .arg(deadline.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn retry(&self, job: &Job, delay: Duration, error: &str) -> QueueResult<()> {
        let mut record = job.clone();
        record.available_at = Utc::now() + chrono_duration(delay);
        record.last_error = Some(error.to_string());
        let raw = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        let moved: i32 = self
            .scripts
            .retry
            .key(&self.jobs_key)
            .key(&self.attempts_key)
            .key(&record.queue_name)
            .key(Self::leased_key(&record.queue_name))
            .arg(record.id.to_string())
            .arg(job.attempts)
            .arg(raw)
            .arg(record.available_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if moved == -1 {
            tracing::debug!(job.id = %job.id, attempt = job.attempts, "Retry from a stale delivery ignored");
        }
        Ok(())
    }

    async fn dead_letter(&self, job: &Job, error: &str) -> QueueResult<()> {
        let now = Utc::now();
        let dead_queue = WorkloadRouting::dead_letter_queue(&job.queue_name);
        let mut record = job.clone();
        record.queue_name = dead_queue.clone();
        record.available_at = now;
        record.last_error = Some(error.to_string());
        let raw = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        let moved: i32 = self
            .scripts
            .dead_letter
            .key(&self.jobs_key)
            .key(&self.attempts_key)
            .key(&job.queue_name)
            .key(Self::leased_key(&job.queue_name))
            .key(&dead_queue)
            .arg(job.id.to_string())
            .arg(job.attempts)
            .arg(raw)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if moved == -1 {
            tracing::debug!(job.id = %job.id, attempt = job.attempts, "Dead-letter from a stale delivery ignored");
        }
        Ok(())
    }

    async fn queue_length(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(queue).await?;
        Ok(len)
    }

    async fn leased_count(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(Self::leased_key(queue)).await?;
        Ok(len)
    }

    async fn purge(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let purged: usize = self
            .scripts
            .purge
            .key(&self.jobs_key)
            .key(&self.attempts_key)
            .key(queue)
            .invoke_async(&mut conn)
            .await?;
        tracing::info!(queue = queue, purged, "Queue purged");
        Ok(purged)
    }

    async fn peek(&self, queue: &str, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = conn.zrange(queue, 0, stop).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raws: Vec<Option<String>> = ::redis::cmd("HMGET")
            .arg(&self.jobs_key)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;
        let attempts: Vec<Option<u32>> = ::redis::cmd("HMGET")
            .arg(&self.attempts_key)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for (raw, count) in raws.into_iter().zip(attempts) {
            let Some(raw) = raw else { continue };
            let mut job: Job = serde_json::from_str(&raw)?;
            job.attempts = count.unwrap_or(job.attempts);
            jobs.push(job);
        }
        Ok(jobs)
    }
}
