//! Configuration module
//!
//! Settings are read from `SHU_*` environment variables (a `.env` file is loaded
//! first when present). Every value has a default so a bare `Config::from_env()`
//! yields a working in-memory setup.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::WorkloadType;

// Queue defaults
const QUEUE_PREFIX: &str = "shu";
const VISIBILITY_TIMEOUT_SECS: u64 = 300;
const MAX_ATTEMPTS: u32 = 3;
// Worker defaults
const WORKER_CONCURRENCY: usize = 4;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const WORKER_JOB_TIMEOUT_SECS: u64 = 900;
const WORKER_RETRY_BASE_DELAY_SECS: u64 = 1;
const WORKER_MAX_RETRY_BACKOFF_SECS: u64 = 300;
const WORKER_SHUTDOWN_GRACE_SECS: u64 = 30;
// Plugin defaults
const PLUGIN_RATE_PER_SEC: f64 = 1.0;
const PLUGIN_BURST: f64 = 5.0;
const PLUGIN_TIMEOUT_SECS: u64 = 120;
const PLUGIN_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const PLUGIN_HTTP_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
const PLUGIN_HTTP_TIMEOUT_SECS: u64 = 30;
const PLUGIN_CACHE_CAPACITY: usize = 1024;
// Scheduler defaults
const SCHEDULER_TICK_INTERVAL_SECS: u64 = 60;
const SCHEDULER_BATCH_LIMIT: usize = 10;
const SCHEDULER_STALE_AFTER_SECS: u64 = 900;
// Ingestion defaults
const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Memory,
    Redis,
}

impl FromStr for QueueBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(QueueBackendKind::Memory),
            "redis" => Ok(QueueBackendKind::Redis),
            other => Err(anyhow::anyhow!("Unknown queue backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backend: QueueBackendKind,
    pub redis_url: Option<String>,
    pub prefix: String,
    pub visibility_timeout_secs: u64,
    pub max_attempts: u32,
    /// Per-workload queue overrides (`SHU_QUEUE_ROUTE_<WORKLOAD>`).
    pub routes: HashMap<WorkloadType, String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::Memory,
            redis_url: None,
            prefix: QUEUE_PREFIX.to_string(),
            visibility_timeout_secs: VISIBILITY_TIMEOUT_SECS,
            max_attempts: MAX_ATTEMPTS,
            routes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workload_types: Vec<WorkloadType>,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
    /// `None` means half the job's visibility timeout.
    pub heartbeat_interval_secs: Option<u64>,
    pub retry_base_delay_secs: u64,
    pub max_retry_backoff_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workload_types: WorkloadType::all().to_vec(),
            concurrency: WORKER_CONCURRENCY,
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            job_timeout_secs: WORKER_JOB_TIMEOUT_SECS,
            heartbeat_interval_secs: None,
            retry_base_delay_secs: WORKER_RETRY_BASE_DELAY_SECS,
            max_retry_backoff_secs: WORKER_MAX_RETRY_BACKOFF_SECS,
            shutdown_grace_secs: WORKER_SHUTDOWN_GRACE_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub rate_per_sec: f64,
    pub burst: f64,
    /// 0 disables the daily quota.
    pub daily_quota: u64,
    /// 0 disables the monthly quota.
    pub monthly_quota: u64,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub http_allowlist: Option<Vec<String>>,
    pub http_allow_private_ips: bool,
    pub http_max_response_bytes: usize,
    pub http_timeout_secs: u64,
    pub cache_capacity: usize,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            rate_per_sec: PLUGIN_RATE_PER_SEC,
            burst: PLUGIN_BURST,
            daily_quota: 0,
            monthly_quota: 0,
            timeout_secs: PLUGIN_TIMEOUT_SECS,
            max_output_bytes: PLUGIN_MAX_OUTPUT_BYTES,
            http_allowlist: None,
            http_allow_private_ips: false,
            http_max_response_bytes: PLUGIN_HTTP_MAX_RESPONSE_BYTES,
            http_timeout_secs: PLUGIN_HTTP_TIMEOUT_SECS,
            cache_capacity: PLUGIN_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub batch_limit: usize,
    pub stale_after_secs: u64,
    /// Requeue stale runs instead of failing them.
    pub stale_retry: bool,
    /// How often a running plugin execution records its heartbeat.
    /// `None` means a third of `stale_after_secs`.
    pub execution_heartbeat_secs: Option<u64>,
}

impl SchedulerSettings {
    pub fn execution_heartbeat_interval(&self) -> Duration {
        match self.execution_heartbeat_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(self.stale_after_secs.max(1)) / 3,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: SCHEDULER_TICK_INTERVAL_SECS,
            batch_limit: SCHEDULER_BATCH_LIMIT,
            stale_after_secs: SCHEDULER_STALE_AFTER_SECS,
            stale_retry: false,
            execution_heartbeat_secs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub profiling_enabled: bool,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunk_overlap: CHUNK_OVERLAP,
            profiling_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub environment: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            default_filter: "shu=debug".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Application configuration for the worker process.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub plugins: PluginSettings,
    pub scheduler: SchedulerSettings,
    pub ingestion: IngestionSettings,
    pub telemetry: TelemetrySettings,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut queue = QueueSettings::default();
        if let Some(v) = get("SHU_QUEUE_BACKEND") {
            queue.backend = v.parse().map_err(|e: anyhow::Error| ConfigError::InvalidValue {
                key: "SHU_QUEUE_BACKEND".to_string(),
                message: e.to_string(),
            })?;
        }
        queue.redis_url = get("SHU_REDIS_URL").map(str::to_string);
        if let Some(v) = get("SHU_QUEUE_PREFIX") {
            queue.prefix = v.to_string();
        }
        queue.visibility_timeout_secs = parse_var(
            vars,
            "SHU_QUEUE_VISIBILITY_TIMEOUT_SECS",
            queue.visibility_timeout_secs,
        )?;
        queue.max_attempts = parse_var(vars, "SHU_QUEUE_MAX_ATTEMPTS", queue.max_attempts)?;
        for workload in WorkloadType::all() {
            let key = format!("SHU_QUEUE_ROUTE_{}", workload.as_str().to_uppercase());
            if let Some(route) = get(&key) {
                queue.routes.insert(*workload, route.to_string());
            }
        }

        let mut worker = WorkerSettings::default();
        if let Some(v) = get("SHU_WORKER_WORKLOADS") {
            worker.workload_types = v
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<WorkloadType>()
                        .map_err(|e| ConfigError::InvalidValue {
                            key: "SHU_WORKER_WORKLOADS".to_string(),
                            message: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
        }
        worker.concurrency = parse_var(vars, "SHU_WORKER_CONCURRENCY", worker.concurrency)?;
        worker.poll_interval_ms =
            parse_var(vars, "SHU_WORKER_POLL_INTERVAL_MS", worker.poll_interval_ms)?;
        worker.job_timeout_secs =
            parse_var(vars, "SHU_WORKER_JOB_TIMEOUT_SECS", worker.job_timeout_secs)?;
        if get("SHU_WORKER_HEARTBEAT_INTERVAL_SECS").is_some() {
            worker.heartbeat_interval_secs = Some(parse_var(
                vars,
                "SHU_WORKER_HEARTBEAT_INTERVAL_SECS",
                0u64,
            )?);
        }
        worker.retry_base_delay_secs = parse_var(
            vars,
            "SHU_WORKER_RETRY_BASE_DELAY_SECS",
            worker.retry_base_delay_secs,
        )?;
        worker.max_retry_backoff_secs = parse_var(
            vars,
            "SHU_WORKER_MAX_RETRY_BACKOFF_SECS",
            worker.max_retry_backoff_secs,
        )?;
        worker.shutdown_grace_secs = parse_var(
            vars,
            "SHU_WORKER_SHUTDOWN_GRACE_SECS",
            worker.shutdown_grace_secs,
        )?;

        let mut plugins = PluginSettings::default();
        plugins.rate_per_sec = parse_var(vars, "SHU_PLUGIN_RATE_PER_SEC", plugins.rate_per_sec)?;
        plugins.burst = parse_var(vars, "SHU_PLUGIN_BURST", plugins.burst)?;
        plugins.daily_quota = parse_var(vars, "SHU_PLUGIN_DAILY_QUOTA", plugins.daily_quota)?;
        plugins.monthly_quota =
            parse_var(vars, "SHU_PLUGIN_MONTHLY_QUOTA", plugins.monthly_quota)?;
        plugins.timeout_secs = parse_var(vars, "SHU_PLUGIN_TIMEOUT_SECS", plugins.timeout_secs)?;
        plugins.max_output_bytes =
            parse_var(vars, "SHU_PLUGIN_MAX_OUTPUT_BYTES", plugins.max_output_bytes)?;
        plugins.http_allowlist = get("SHU_PLUGIN_HTTP_ALLOWLIST").map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        });
        plugins.http_allow_private_ips = parse_bool(
            vars,
            "SHU_PLUGIN_HTTP_ALLOW_PRIVATE_IPS",
            plugins.http_allow_private_ips,
        )?;
        plugins.http_max_response_bytes = parse_var(
            vars,
            "SHU_PLUGIN_HTTP_MAX_RESPONSE_BYTES",
            plugins.http_max_response_bytes,
        )?;
        plugins.http_timeout_secs =
            parse_var(vars, "SHU_PLUGIN_HTTP_TIMEOUT_SECS", plugins.http_timeout_secs)?;
        plugins.cache_capacity =
            parse_var(vars, "SHU_PLUGIN_CACHE_CAPACITY", plugins.cache_capacity)?;

        let mut scheduler = SchedulerSettings::default();
        scheduler.enabled = parse_bool(vars, "SHU_SCHEDULER_ENABLED", scheduler.enabled)?;
        scheduler.tick_interval_secs = parse_var(
            vars,
            "SHU_SCHEDULER_TICK_INTERVAL_SECS",
            scheduler.tick_interval_secs,
        )?;
        scheduler.batch_limit =
            parse_var(vars, "SHU_SCHEDULER_BATCH_LIMIT", scheduler.batch_limit)?;
        scheduler.stale_after_secs = parse_var(
            vars,
            "SHU_SCHEDULER_STALE_AFTER_SECS",
            scheduler.stale_after_secs,
        )?;
        scheduler.stale_retry =
            parse_bool(vars, "SHU_SCHEDULER_STALE_RETRY", scheduler.stale_retry)?;
        if get("SHU_SCHEDULER_EXECUTION_HEARTBEAT_SECS").is_some() {
            scheduler.execution_heartbeat_secs = Some(parse_var(
                vars,
                "SHU_SCHEDULER_EXECUTION_HEARTBEAT_SECS",
                0u64,
            )?);
        }

        let mut ingestion = IngestionSettings::default();
        ingestion.chunk_size = parse_var(vars, "SHU_INGESTION_CHUNK_SIZE", ingestion.chunk_size)?;
        ingestion.chunk_overlap =
            parse_var(vars, "SHU_INGESTION_CHUNK_OVERLAP", ingestion.chunk_overlap)?;
        ingestion.profiling_enabled = parse_bool(
            vars,
            "SHU_INGESTION_PROFILING_ENABLED",
            ingestion.profiling_enabled,
        )?;

        let mut telemetry = TelemetrySettings::default();
        if let Some(v) = get("SHU_LOG_FORMAT") {
            telemetry.log_format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "SHU_LOG_FORMAT".to_string(),
                        message: format!("expected 'json' or 'pretty', got '{}'", other),
                    })
                }
            };
        }
        if let Some(v) = get("SHU_LOG_FILTER") {
            telemetry.default_filter = v.to_string();
        }
        if let Some(v) = get("SHU_ENVIRONMENT").or_else(|| get("ENVIRONMENT")) {
            telemetry.environment = v.to_string();
        }

        let config = Self {
            queue,
            worker,
            plugins,
            scheduler,
            ingestion,
            telemetry,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.backend == QueueBackendKind::Redis && self.queue.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "SHU_REDIS_URL must be set when SHU_QUEUE_BACKEND=redis".to_string(),
            ));
        }
        if let Some(url) = &self.queue.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::Invalid(
                    "SHU_REDIS_URL must be a redis:// or rediss:// URL".to_string(),
                ));
            }
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "SHU_QUEUE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "SHU_WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.worker.workload_types.is_empty() {
            return Err(ConfigError::Invalid(
                "SHU_WORKER_WORKLOADS must name at least one workload".to_string(),
            ));
        }
        if self.worker.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "SHU_WORKER_HEARTBEAT_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.plugins.rate_per_sec <= 0.0 || self.plugins.burst < 1.0 {
            return Err(ConfigError::Invalid(
                "SHU_PLUGIN_RATE_PER_SEC must be positive and SHU_PLUGIN_BURST at least 1"
                    .to_string(),
            ));
        }
        if self.ingestion.chunk_size == 0
            || self.ingestion.chunk_overlap >= self.ingestion.chunk_size
        {
            return Err(ConfigError::Invalid(
                "SHU_INGESTION_CHUNK_OVERLAP must be smaller than a non-zero SHU_INGESTION_CHUNK_SIZE"
                    .to_string(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "SHU_SCHEDULER_TICK_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.scheduler.stale_after_secs == 0 {
            return Err(ConfigError::Invalid(
                "SHU_SCHEDULER_STALE_AFTER_SECS must be at least 1".to_string(),
            ));
        }
        if let Some(heartbeat) = self.scheduler.execution_heartbeat_secs {
            if heartbeat == 0 || heartbeat >= self.scheduler.stale_after_secs {
                return Err(ConfigError::Invalid(
                    "SHU_SCHEDULER_EXECUTION_HEARTBEAT_SECS must be at least 1 and shorter than SHU_SCHEDULER_STALE_AFTER_SECS"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.telemetry.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{}'", other),
            }),
        },
        None => Ok(default),
    }
}
