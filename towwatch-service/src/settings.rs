//! Translate the loaded configuration into engine and monitor settings.

use chrono::TimeDelta;
use std::time::Duration;
use towwatch_engine::{RetryPolicy, SchedulerSettings};
use towwatch_store::app_config::Config;

use crate::error::SettingsError;
use crate::monitor::MonitorSettings;

pub fn scheduler_settings(config: &Config) -> SchedulerSettings {
    SchedulerSettings {
        grace_period: Duration::from_secs(config.scheduler.grace_period_secs),
        proactive_clear_threshold: Duration::from_secs(config.scheduler.proactive_clear_threshold_secs),
        min_delay: Duration::from_millis(config.scheduler.min_delay_ms),
    }
}

pub fn retry_policy(config: &Config) -> RetryPolicy {
    let interval = Duration::from_millis(config.retry.interval_ms);
    match config.retry.max_attempts {
        Some(max) => RetryPolicy::bounded(interval, max),
        None => RetryPolicy::forever(interval),
    }
}

pub fn monitor_settings(config: &Config) -> Result<MonitorSettings, SettingsError> {
    Ok(MonitorSettings {
        refresh_interval: Duration::from_secs(config.refresh.interval_secs),
        window_from: hours("refresh.window_from_hours", config.refresh.window_from_hours)?,
        window_to: hours("refresh.window_to_hours", config.refresh.window_to_hours)?,
        poll_timeout: Duration::from_millis(config.kafka.poll_timeout_ms),
        channel_retry_interval: Duration::from_millis(config.retry.interval_ms),
        flight_reconciliation: config.startup.flight_reconciliation,
        lookback: hours("startup.lookback_hours", config.startup.lookback_hours)?,
    })
}

/// Ten years either way; anything larger cannot be added to the current time
const MAX_OFFSET_HOURS: u64 = 10 * 366 * 24;

fn hours(key: &'static str, value: i64) -> Result<TimeDelta, SettingsError> {
    TimeDelta::try_hours(value)
        .filter(|_| value.unsigned_abs() <= MAX_OFFSET_HOURS)
        .ok_or(SettingsError::HoursOutOfRange { key, value })
}

pub fn fatal_exit_delay(config: &Config) -> Duration {
    Duration::from_secs(config.startup.fatal_exit_delay_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use towwatch_store::app_config::{
        AmsConfig, KafkaConfig, LoggingConfig, RefreshConfig, RetryConfig, SchedulerConfig, StandsConfig,
        StartupConfig,
    };

    fn config() -> Config {
        Config {
            ams: AmsConfig {
                base_uri: "http://localhost/api/v1/".to_string(),
                token: "t".to_string(),
                airport_code: "AUH".to_string(),
                flight_alert_field: "Al_TowNotStarted".to_string(),
            },
            kafka: KafkaConfig {
                brokers: "localhost:9092".to_string(),
                group_id: "towwatch".to_string(),
                topic: "ams.notifications".to_string(),
                poll_timeout_ms: 250,
            },
            scheduler: SchedulerConfig {
                grace_period_secs: 120,
                ..SchedulerConfig::default()
            },
            retry: RetryConfig::default(),
            refresh: RefreshConfig {
                interval_secs: 3600,
                window_from_hours: -12,
                window_to_hours: 24,
            },
            stands: StandsConfig::default(),
            startup: StartupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_conversions() {
        let mut config = config();

        let scheduler = scheduler_settings(&config);
        assert_eq!(scheduler.grace_period, Duration::from_secs(120));
        assert_eq!(scheduler.min_delay, Duration::from_secs(1));

        assert_eq!(retry_policy(&config), RetryPolicy::forever(Duration::from_secs(10)));
        config.retry.max_attempts = Some(4);
        assert_eq!(retry_policy(&config).max_attempts, Some(4));

        let monitor = monitor_settings(&config).unwrap();
        assert_eq!(monitor.window_from, chrono::Duration::hours(-12));
        assert_eq!(monitor.poll_timeout, Duration::from_millis(250));
        assert_eq!(monitor.lookback, chrono::Duration::hours(24));
        assert_eq!(fatal_exit_delay(&config), Duration::from_secs(5));
    }

    #[test]
    fn test_out_of_range_hours_are_rejected() {
        let mut config = config();
        config.startup.lookback_hours = i64::MAX;

        match monitor_settings(&config) {
            Err(SettingsError::HoursOutOfRange { key, value }) => {
                assert_eq!(key, "startup.lookback_hours");
                assert_eq!(value, i64::MAX);
            }
            other => panic!("expected an out of range error, got {:?}", other.map(|_| ())),
        }

        config.startup.lookback_hours = 24;
        config.refresh.window_to_hours = i64::MIN;
        assert!(monitor_settings(&config).is_err());

        // Valid for chrono, but would overflow once added to now
        config.refresh.window_to_hours = 1_000_000_000;
        assert!(monitor_settings(&config).is_err());
    }
}
