//! Job execution error types
//!
//! Handlers return [`JobError`] so the worker can decide between retrying a job
//! and dead-lettering it. Errors are recoverable unless a handler says otherwise.

use std::fmt;
use std::time::Duration;

/// How the worker should treat a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Transient failure, retried while attempts remain.
    Recoverable,
    /// Permanent failure, dead-lettered immediately.
    Unrecoverable,
    /// The handler ran past the job timeout. Retried like a recoverable error.
    Timeout,
}

/// Job execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    kind: JobErrorKind,
    retry_after: Option<Duration>,
}

impl JobError {
    /// Create a new unrecoverable job error
    ///
    /// Unrecoverable errors cause the job to be dead-lettered without retrying.
    /// Use this for errors like:
    /// - Missing records or malformed payloads
    /// - Input that fails schema validation
    /// - Disabled or unknown plugins
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Unrecoverable,
            retry_after: None,
        }
    }

    /// Create a new recoverable job error
    ///
    /// Recoverable errors are retried with exponential backoff until the job
    /// runs out of attempts.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Recoverable,
            retry_after: None,
        }
    }

    /// Error used by the worker when a handler exceeds its time budget.
    pub fn timeout(seconds: u64) -> Self {
        Self {
            inner: anyhow::anyhow!("Job execution timed out after {}s", seconds),
            kind: JobErrorKind::Timeout,
            retry_after: None,
        }
    }

    /// Earliest sensible redelivery, e.g. from a rate limiter. The worker waits
    /// at least this long, even when its own backoff is shorter.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    /// Check if this error is recoverable (should be retried)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind, JobErrorKind::Unrecoverable)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, JobErrorKind::Timeout)
    }

    /// Get the inner error
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Consume self and return the inner error
    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Alternate formatting keeps the context chain in the stored error string.
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Default conversion from anyhow::Error creates a recoverable error
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to easily create unrecoverable job errors
pub trait JobResultExt<T> {
    /// Mark this result as unrecoverable on error
    fn unrecoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_unrecoverable_error() {
        let err = JobError::unrecoverable(anyhow::anyhow!("Document not found"));
        assert!(!err.is_recoverable());
        assert_eq!(err.kind(), JobErrorKind::Unrecoverable);
        assert!(err.to_string().contains("Document not found"));
    }

    #[test]
    fn test_recoverable_error() {
        let err = JobError::recoverable(anyhow::anyhow!("Connection reset"));
        assert!(err.is_recoverable());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_is_retried() {
        let err = JobError::timeout(30);
        assert!(err.is_recoverable());
        assert!(err.is_timeout());
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_retry_after_hint() {
        let err = JobError::recoverable(anyhow::anyhow!("Rate limited"))
            .with_retry_after(Duration::from_secs(12));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(JobError::timeout(1).retry_after().is_none());
    }

    #[test]
    fn test_from_anyhow() {
        let err: JobError = anyhow::anyhow!("Some error").into();
        assert!(err.is_recoverable(), "Default should be recoverable");
    }

    #[test]
    fn test_display_keeps_context_chain() {
        let result: anyhow::Result<()> =
            Err(anyhow::anyhow!("socket closed")).context("Failed to fetch source");
        let err: JobError = result.unwrap_err().into();
        let message = err.to_string();
        assert!(message.contains("Failed to fetch source"));
        assert!(message.contains("socket closed"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("Bad payload"));
        let job_result = result.unrecoverable();
        assert!(!job_result.unwrap_err().is_recoverable());
    }
}
