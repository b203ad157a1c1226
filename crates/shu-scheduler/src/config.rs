use std::time::Duration;

use shu_core::models::chrono_duration;
use shu_core::SchedulerSettings;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// Feeds started per tick at most.
    pub batch_limit: usize,
    /// A running execution without a heartbeat for this long is stale.
    pub stale_after_secs: u64,
    /// Requeue stale executions instead of failing them.
    pub stale_retry: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            tick_interval_secs: settings.tick_interval_secs.max(1),
            batch_limit: settings.batch_limit.max(1),
            stale_after_secs: settings.stale_after_secs.max(1),
            stale_retry: settings.stale_retry,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono_duration(Duration::from_secs(self.stale_after_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.stale_after_secs, 900);
        assert!(!config.stale_retry);
        assert_eq!(config.stale_after(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_huge_stale_after_is_capped() {
        let config = SchedulerConfig {
            stale_after_secs: u64::MAX,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.stale_after(), chrono::Duration::days(36_500));
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let settings = SchedulerSettings {
            tick_interval_secs: 0,
            batch_limit: 0,
            ..SchedulerSettings::default()
        };
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_limit, 1);
    }
}
