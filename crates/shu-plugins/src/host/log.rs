use std::sync::Arc;

use super::HostScope;

/// Plugin log lines, tagged with the plugin and execution.
#[derive(Clone)]
pub struct LogCapability {
    scope: Arc<HostScope>,
}

impl LogCapability {
    pub(crate) fn new(scope: Arc<HostScope>) -> Self {
        Self { scope }
    }

    pub fn info(&self, message: &str) {
        tracing::info!(
            plugin = %self.scope.plugin,
            execution.id = %self.scope.execution_id,
            "{}",
            message
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            plugin = %self.scope.plugin,
            execution.id = %self.scope.execution_id,
            "{}",
            message
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            plugin = %self.scope.plugin,
            execution.id = %self.scope.execution_id,
            "{}",
            message
        );
    }
}
