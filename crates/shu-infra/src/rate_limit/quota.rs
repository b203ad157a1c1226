use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaPeriod {
    Daily,
    Monthly,
}

impl QuotaPeriod {
    /// Identifier of the UTC window containing `now`.
    fn window_id(&self, now: DateTime<Utc>) -> i64 {
        match self {
            QuotaPeriod::Daily => i64::from(now.num_days_from_ce()),
            QuotaPeriod::Monthly => i64::from(now.year()) * 12 + i64::from(now.month0()),
        }
    }

    /// Start of the window following the one containing `now`.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let next = match self {
            QuotaPeriod::Daily => date.succ_opt(),
            QuotaPeriod::Monthly => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        };
        next.and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(now)
    }
}

impl fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaPeriod::Daily => write!(f, "daily"),
            QuotaPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

/// Call limits per period. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaLimits {
    pub daily: u64,
    pub monthly: u64,
}

impl QuotaLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    fn limit_for(&self, period: QuotaPeriod) -> u64 {
        match period {
            QuotaPeriod::Daily => self.daily,
            QuotaPeriod::Monthly => self.monthly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{period} quota exceeded: {used}/{limit} calls used, resets at {resets_at}")]
pub struct QuotaViolation {
    pub period: QuotaPeriod,
    pub limit: u64,
    pub used: u64,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    id: i64,
    count: u64,
}

/// Fixed-window usage counters per key and period.
///
/// A call is admitted only if every limited period has room; admission then
/// counts against all periods at once, so a rejection never consumes quota.
#[derive(Clone, Default)]
pub struct QuotaTracker {
    windows: Arc<Mutex<HashMap<(String, QuotaPeriod), Window>>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip(self, limits))]
    pub async fn check_and_consume(
        &self,
        key: &str,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> Result<(), QuotaViolation> {
        const PERIODS: [QuotaPeriod; 2] = [QuotaPeriod::Daily, QuotaPeriod::Monthly];

        let mut windows = self.windows.lock().await;

        for period in PERIODS {
            let limit = limits.limit_for(period);
            if limit == 0 {
                continue;
            }
            let used = current_count(&windows, key, period, now);
            if used >= limit {
                tracing::debug!(key = key, period = %period, used, limit, "Quota exhausted");
                return Err(QuotaViolation {
                    period,
                    limit,
                    used,
                    resets_at: period.next_reset(now),
                });
            }
        }

        for period in PERIODS {
            let id = period.window_id(now);
            let window = windows
                .entry((key.to_string(), period))
                .or_insert(Window { id, count: 0 });
            if window.id != id {
                *window = Window { id, count: 0 };
            }
            window.count += 1;
        }
        Ok(())
    }

    /// Calls counted in the window containing `now`.
    pub async fn usage(&self, key: &str, period: QuotaPeriod, now: DateTime<Utc>) -> u64 {
        let windows = self.windows.lock().await;
        current_count(&windows, key, period, now)
    }
}

fn current_count(
    windows: &HashMap<(String, QuotaPeriod), Window>,
    key: &str,
    period: QuotaPeriod,
    now: DateTime<Utc>,
) -> u64 {
    windows
        .get(&(key.to_string(), period))
        .filter(|w| w.id == period.window_id(now))
        .map_or(0, |w| w.count)
}
