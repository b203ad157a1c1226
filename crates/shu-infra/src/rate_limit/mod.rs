//! Rate limiting service
//!
//! Token buckets for call rates and fixed-window counters for daily and
//! monthly quotas.

pub use limiter::{RateDecision, RateLimiter};
pub use quota::{QuotaLimits, QuotaPeriod, QuotaTracker, QuotaViolation};

mod limiter;
mod quota;
