use std::time::Duration;

use shu_core::JobError;
use shu_infra::QuotaViolation;

use crate::manifest::Capability;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("Plugin '{0}' is disabled")]
    Disabled(String),

    #[error("Plugin '{plugin}' has no operation '{operation}'")]
    UnknownOperation { plugin: String, operation: String },

    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid input: {}", .errors.join("; "))]
    InvalidInput { errors: Vec<String> },

    #[error("Invalid output: {}", .errors.join("; "))]
    InvalidOutput { errors: Vec<String> },

    #[error("Rate limited, retry after {}ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaViolation),

    #[error("Plugin '{plugin}' did not declare the {capability} capability")]
    CapabilityDenied {
        plugin: String,
        capability: Capability,
    },

    #[error("Egress denied: {0}")]
    EgressDenied(String),

    #[error("Knowledge base {0} is not granted to this execution")]
    KnowledgeBaseDenied(uuid::Uuid),

    #[error("Plugin execution timed out after {0}s")]
    Timeout(u64),

    #[error("Plugin output is {size} bytes, limit is {limit}")]
    OutputTooLarge { size: usize, limit: usize },

    /// Transient failure reported by the plugin or a host service; retried.
    #[error("Plugin execution failed: {0}")]
    Execution(String),

    /// Permanent failure reported by the plugin; not retried.
    #[error("Plugin failed permanently: {0}")]
    Fatal(String),
}

impl PluginError {
    pub fn execution(err: impl std::fmt::Display) -> Self {
        PluginError::Execution(err.to_string())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PluginError::RateLimited { .. } | PluginError::Timeout(_) | PluginError::Execution(_)
        )
    }
}

impl From<PluginError> for JobError {
    fn from(err: PluginError) -> Self {
        if let PluginError::RateLimited { retry_after } = &err {
            let retry_after = *retry_after;
            JobError::recoverable(err).with_retry_after(retry_after)
        } else if err.is_recoverable() {
            JobError::recoverable(err)
        } else {
            JobError::unrecoverable(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PluginError::RateLimited {
            retry_after: Duration::from_millis(10)
        }
        .is_recoverable());
        assert!(PluginError::Timeout(5).is_recoverable());
        assert!(PluginError::Execution("503".into()).is_recoverable());

        assert!(!PluginError::NotFound("x".into()).is_recoverable());
        assert!(!PluginError::InvalidInput { errors: vec![] }.is_recoverable());
        assert!(!PluginError::Fatal("bad token".into()).is_recoverable());
    }

    #[test]
    fn test_job_error_mapping() {
        let job_err: JobError = PluginError::Disabled("gmail".into()).into();
        assert!(!job_err.is_recoverable());
        assert!(job_err.to_string().contains("disabled"));

        let job_err: JobError = PluginError::Timeout(3).into();
        assert!(job_err.is_recoverable());
        assert!(job_err.retry_after().is_none());

        let job_err: JobError = PluginError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into();
        assert!(job_err.is_recoverable());
        assert_eq!(job_err.retry_after(), Some(Duration::from_millis(1500)));
    }
}
