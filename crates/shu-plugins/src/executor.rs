//! Plugin executor: the guarded path from a request to a plugin's output.
//!
//! Order of checks: registry lookup, enabled flag, operation lookup, input
//! schema, rate limit, quota, then the call itself under a timeout, then the
//! output schema and size cap. Quota is only consumed once the rate limit
//! has admitted the call.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use shu_core::models::PluginExecution;
use shu_core::PluginSettings;
use shu_infra::{QuotaLimits, QuotaTracker, RateLimiter};

use crate::error::PluginError;
use crate::host::{Host, HostPolicy, HostServices};
use crate::plugin::{PluginCall, PluginUsage};
use crate::registry::PluginRegistry;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rate_per_sec: f64,
    pub burst: f64,
    pub quota: QuotaLimits,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_settings(&PluginSettings::default())
    }
}

impl ExecutorConfig {
    pub fn from_settings(settings: &PluginSettings) -> Self {
        Self {
            rate_per_sec: settings.rate_per_sec,
            burst: settings.burst,
            quota: QuotaLimits {
                daily: settings.daily_quota,
                monthly: settings.monthly_quota,
            },
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            max_output_bytes: settings.max_output_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub plugin: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub user_id: Uuid,
    pub execution_id: Uuid,
    #[serde(default)]
    pub kb_grants: Vec<Uuid>,
}

impl ExecutionRequest {
    pub fn from_execution(execution: &PluginExecution) -> Self {
        Self {
            plugin: execution.plugin_name.clone(),
            operation: execution.operation.clone(),
            params: execution.params.clone(),
            user_id: execution.user_id,
            execution_id: execution.id,
            kb_grants: execution.kb_grants.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub data: serde_json::Value,
    pub duration: Duration,
    pub usage: Option<PluginUsage>,
}

pub struct PluginExecutor {
    registry: PluginRegistry,
    services: HostServices,
    policy: Arc<HostPolicy>,
    limiter: RateLimiter,
    quotas: QuotaTracker,
    config: ExecutorConfig,
}

impl PluginExecutor {
    pub fn new(
        registry: PluginRegistry,
        services: HostServices,
        policy: HostPolicy,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_per_sec, config.burst),
            registry,
            services,
            policy: Arc::new(policy),
            quotas: QuotaTracker::new(),
            config,
        }
    }

    /// Replace the default limiter, e.g. one with per-plugin prefix rules.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn quotas(&self) -> &QuotaTracker {
        &self.quotas
    }

    /// Key for rate limit and quota accounting.
    pub fn usage_key(plugin: &str, user_id: Uuid) -> String {
        format!("{}:{}", plugin, user_id)
    }

    #[tracing::instrument(skip(self, request), fields(plugin = %request.plugin, operation = %request.operation, execution.id = %request.execution_id))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, PluginError> {
        let plugin = self.registry.get(&request.plugin).await?;
        if !self.registry.is_enabled(&request.plugin).await {
            return Err(PluginError::Disabled(request.plugin));
        }

        let manifest = plugin.manifest();
        if manifest.operation(&request.operation).is_none() {
            return Err(PluginError::UnknownOperation {
                plugin: request.plugin,
                operation: request.operation,
            });
        }
        let schemas = self
            .registry
            .schemas(&request.plugin, &request.operation)
            .await
            .unwrap_or_default();

        if let Some(input) = &schemas.input {
            input
                .check(&request.params)
                .map_err(|errors| PluginError::InvalidInput { errors })?;
        }

        let key = Self::usage_key(&request.plugin, request.user_id);
        let decision = self.limiter.try_acquire(&key).await;
        if !decision.allowed {
            tracing::info!(retry_after_ms = decision.retry_after.as_millis() as u64, "Plugin call rate limited");
            return Err(PluginError::RateLimited {
                retry_after: decision.retry_after,
            });
        }
        self.quotas
            .check_and_consume(&key, self.config.quota, Utc::now())
            .await?;

        let host = Host::build(
            manifest,
            request.user_id,
            request.execution_id,
            request.kb_grants,
            &self.services,
            self.policy.clone(),
        );
        let call = PluginCall {
            operation: request.operation,
            params: request.params,
            user_id: request.user_id,
            execution_id: request.execution_id,
        };

        let started = Instant::now();
        let output = tokio::time::timeout(self.config.timeout, plugin.execute(call, &host))
            .await
            .map_err(|_| PluginError::Timeout(self.config.timeout.as_secs()))??;
        let duration = started.elapsed();

        if let Some(schema) = &schemas.output {
            schema
                .check(&output.data)
                .map_err(|errors| PluginError::InvalidOutput { errors })?;
        }

        let size = serde_json::to_vec(&output.data)
            .map(|bytes| bytes.len())
            .map_err(|e| PluginError::Fatal(format!("output is not serializable: {}", e)))?;
        if size > self.config.max_output_bytes {
            return Err(PluginError::OutputTooLarge {
                size,
                limit: self.config.max_output_bytes,
            });
        }

        tracing::info!(
            duration_ms = duration.as_millis() as u64,
            output_bytes = size,
            "Plugin execution completed"
        );
        Ok(ExecutionOutcome {
            data: output.data,
            duration,
            usage: output.usage,
        })
    }
}
