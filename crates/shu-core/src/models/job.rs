use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::WorkloadType;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 300;

/// A unit of background work sitting on a queue.
///
/// The payload is opaque to the queue. `attempts` counts deliveries and is bumped
/// by the backend on every dequeue; the id is kept across retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub visibility_timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(queue_name: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            created_at: now,
            available_at: now,
            last_error: None,
        }
    }

    /// Values below one are clamped: every job gets at least one delivery.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.available_at = Utc::now() + chrono_duration(delay);
        self
    }

    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = at;
        self
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Extract the payload as a typed struct.
    /// Returns None if deserialization fails.
    pub fn payload_as<P: JobPayload>(&self) -> Option<P> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: JobPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Serialize a typed payload.
    pub fn payload_from<P: JobPayload>(payload: &P) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(payload)
    }
}

/// Trait for type-safe job payloads
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn workload_type() -> WorkloadType;
}

/// Convert a std duration to chrono. Out-of-range values are capped at a century.
pub fn chrono_duration(duration: Duration) -> chrono::Duration {
    const CAP_DAYS: i64 = 36_500;
    chrono::Duration::from_std(duration)
        .ok()
        .filter(|d| *d <= chrono::Duration::days(CAP_DAYS))
        .unwrap_or_else(|| chrono::Duration::days(CAP_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct EchoPayload {
        message: String,
    }

    impl JobPayload for EchoPayload {
        fn workload_type() -> WorkloadType {
            WorkloadType::Maintenance
        }
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("shu:maintenance", json!({}));
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.can_retry());
        assert!(job.is_available(Utc::now()));
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_max_attempts_clamped_to_one() {
        let job = Job::new("q", json!({})).with_max_attempts(0);
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn test_delay_makes_job_unavailable() {
        let job = Job::new("q", json!({})).with_delay(Duration::from_secs(60));
        assert!(!job.is_available(Utc::now()));
        assert!(job.is_available(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_can_retry_exhausted() {
        let mut job = Job::new("q", json!({})).with_max_attempts(2);
        job.attempts = 2;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_typed_payload() {
        let payload = EchoPayload {
            message: "hi".to_string(),
        };
        let job = Job::new("q", Job::payload_from(&payload).unwrap());
        assert_eq!(job.payload_as::<EchoPayload>(), Some(payload));

        let bad = Job::new("q", json!({"other": 1}));
        assert!(bad.payload_as::<EchoPayload>().is_none());
        assert!(bad.try_payload_as::<EchoPayload>().is_err());
    }
}
