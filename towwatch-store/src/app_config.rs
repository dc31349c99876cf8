use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ams: AmsConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub stands: StandsConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AmsConfig {
    pub base_uri: String,
    pub token: String,
    pub airport_code: String,
    pub flight_alert_field: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub grace_period_secs: u64,
    #[serde(default = "default_threshold")]
    pub proactive_clear_threshold_secs: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
}

fn default_threshold() -> u64 {
    10
}

fn default_min_delay() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 0,
            proactive_clear_threshold_secs: default_threshold(),
            min_delay_ms: default_min_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_interval")]
    pub interval_ms: u64,
    pub max_attempts: Option<u32>, // None = until success
}

fn default_retry_interval() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub window_from_hours: i64,
    pub window_to_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StandsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tow_id_field")]
    pub tow_id_field: String,
    #[serde(default = "default_stand_alert_field")]
    pub alert_field: String,
}

fn default_tow_id_field() -> String {
    "S---_TowId".to_string()
}

fn default_stand_alert_field() -> String {
    "B---_TowingNotStarted".to_string()
}

impl Default for StandsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tow_id_field: default_tow_id_field(),
            alert_field: default_stand_alert_field(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    #[serde(default)]
    pub flight_reconciliation: bool,
    #[serde(default = "default_lookback")]
    pub lookback_hours: i64,
    #[serde(default = "default_fatal_exit_delay")]
    pub fatal_exit_delay_secs: u64,
}

fn default_lookback() -> i64 {
    24
}

fn default_fatal_exit_delay() -> u64 {
    5
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            flight_reconciliation: false,
            lookback_hours: default_lookback(),
            fatal_exit_delay_secs: default_fatal_exit_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Layers, last wins: `default`, `{RUN_MODE}`, `local`, then `TOWWATCH__*`
    /// environment variables.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let dir = dir.as_ref();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let layer = |name: &str| dir.join(name).to_string_lossy().into_owned();

        let s = config::Config::builder()
            .add_source(config::File::with_name(&layer("default")))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&layer(&run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name(&layer("local")).required(false))
            // Eg. `TOWWATCH__AMS__TOKEN=...` sets `ams.token`
            .add_source(config::Environment::with_prefix("TOWWATCH").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MINIMAL: &str = r#"
[ams]
base_uri = "http://localhost:8080/api/v1/"
token = "secret"
airport_code = "AUH"
flight_alert_field = "Al_TowNotStarted"

[kafka]
brokers = "localhost:9092"
group_id = "towwatch"
topic = "ams.notifications"

[refresh]
interval_secs = 3600
window_from_hours = -12
window_to_hours = 24
"#;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), MINIMAL).unwrap();

        let config = Config::load_from(dir.path()).unwrap();

        assert_eq!(config.ams.airport_code, "AUH");
        assert_eq!(config.kafka.poll_timeout_ms, 1000);
        assert_eq!(config.scheduler.proactive_clear_threshold_secs, 10);
        assert_eq!(config.scheduler.min_delay_ms, 1000);
        assert_eq!(config.retry.interval_ms, 10_000);
        assert_eq!(config.retry.max_attempts, None);
        assert!(!config.stands.enabled);
        assert_eq!(config.stands.alert_field, "B---_TowingNotStarted");
        assert_eq!(config.startup.lookback_hours, 24);
        assert_eq!(config.startup.fatal_exit_delay_secs, 5);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_local_layer_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), MINIMAL).unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[retry]\ninterval_ms = 500\nmax_attempts = 3\n\n[stands]\nenabled = true\n",
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();

        assert_eq!(config.retry.interval_ms, 500);
        assert_eq!(config.retry.max_attempts, Some(3));
        assert!(config.stands.enabled);
        assert_eq!(config.stands.tow_id_field, "S---_TowId");
    }

    #[test]
    fn test_missing_default_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }
}
