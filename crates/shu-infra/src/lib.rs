//! Shu Infrastructure Library
//!
//! Shared infrastructure used by the worker process:
//! - Telemetry initialization (tracing subscriber)
//! - Rate limiting and usage quotas

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

#[cfg(feature = "rate-limit")]
pub use rate_limit::{QuotaLimits, QuotaPeriod, QuotaTracker, QuotaViolation, RateDecision, RateLimiter};
