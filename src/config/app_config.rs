use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::helpers::{deserialize_duration_from_ms, deserialize_duration_from_seconds};

/// Provides the default value for poll_interval_ms.
fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

/// Provides the default value for line_channel_capacity.
fn default_line_channel_capacity() -> usize {
    1024
}

/// Provides the default value for log_channel_capacity.
fn default_log_channel_capacity() -> usize {
    256
}

/// Provides the default value for shutdown_timeout.
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Application configuration for Vigil.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Path to the access log to tail.
    pub log_file: PathBuf,

    /// The interval to wait between polls for new data at end-of-file.
    #[serde(deserialize_with = "deserialize_duration_from_ms", default = "default_poll_interval")]
    pub poll_interval_ms: Duration,

    /// The duration of one aggregation bucket. Every window length must be a
    /// whole multiple of this.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub bucket_duration_secs: Duration,

    /// The length of the window backing the displayed statistics.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub stats_window_secs: Duration,

    /// The length of the window backing traffic alerting.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub alert_window_secs: Duration,

    /// How often the status line is recomputed.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub stats_interval_secs: Duration,

    /// How often the traffic alerts are evaluated.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub alert_interval_secs: Duration,

    /// High-traffic threshold in requests per second, applied over the full
    /// alert window.
    pub high_traffic_qps: f64,

    /// Low-traffic threshold in requests per second, applied over the full
    /// alert window.
    pub low_traffic_qps: f64,

    /// The capacity of the channel carrying raw lines from the tailer.
    #[serde(default = "default_line_channel_capacity")]
    pub line_channel_capacity: usize,

    /// The capacity of the channel carrying parse errors and alert messages.
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,

    /// The maximum time to wait for tasks to drain during graceful shutdown.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    /// Matches the serde defaults: defaultable fields get their default
    /// values, required fields start zeroed and fail [`validate`].
    ///
    /// [`validate`]: AppConfig::validate
    fn default() -> Self {
        Self {
            log_file: PathBuf::new(),
            poll_interval_ms: default_poll_interval(),
            bucket_duration_secs: Duration::ZERO,
            stats_window_secs: Duration::ZERO,
            alert_window_secs: Duration::ZERO,
            stats_interval_secs: Duration::ZERO,
            alert_interval_secs: Duration::ZERO,
            high_traffic_qps: 0.0,
            low_traffic_qps: 0.0,
            line_channel_capacity: default_line_channel_capacity(),
            log_channel_capacity: default_log_channel_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading from the configuration directory.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir_str = config_dir.unwrap_or("configs");
        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/app.yaml", config_dir_str)))
            .add_source(Environment::with_prefix("VIGIL").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// Checks the constraints the windowing scheme relies on: a nonzero
    /// bucket duration, and window lengths that are whole multiples of it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_duration_secs.as_secs() == 0 {
            return Err(ConfigError::Message(
                "bucket_duration_secs must be at least 1".to_string(),
            ));
        }
        for (name, window) in [
            ("stats_window_secs", self.stats_window_secs),
            ("alert_window_secs", self.alert_window_secs),
        ] {
            if window.as_secs() == 0 || window.as_secs() % self.bucket_duration_secs.as_secs() != 0
            {
                return Err(ConfigError::Message(format!(
                    "{name} must be a nonzero whole multiple of bucket_duration_secs"
                )));
            }
        }
        if self.line_channel_capacity == 0 || self.log_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "channel capacities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bucket count for a window length; only meaningful after [`validate`].
    ///
    /// [`validate`]: AppConfig::validate
    pub fn bucket_count(&self, window: Duration) -> Option<NonZeroUsize> {
        let buckets = window.as_secs().checked_div(self.bucket_duration_secs.as_secs())?;
        NonZeroUsize::new(buckets as usize)
    }

    /// Creates a new `AppConfigBuilder` for testing purposes.
    #[cfg(test)]
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// A builder for creating `AppConfig` instances for testing.
#[cfg(test)]
#[derive(Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn log_file(mut self, path: &str) -> Self {
        self.config.log_file = path.into();
        self
    }

    pub fn bucket_duration(mut self, secs: u64) -> Self {
        self.config.bucket_duration_secs = Duration::from_secs(secs);
        self
    }

    pub fn stats_window(mut self, secs: u64) -> Self {
        self.config.stats_window_secs = Duration::from_secs(secs);
        self
    }

    pub fn alert_window(mut self, secs: u64) -> Self {
        self.config.alert_window_secs = Duration::from_secs(secs);
        self
    }

    pub fn thresholds(mut self, high_qps: f64, low_qps: f64) -> Self {
        self.config.high_traffic_qps = high_qps;
        self.config.low_traffic_qps = low_qps;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_builder() {
        let config = AppConfig::builder()
            .log_file("/var/log/apache2/access.log")
            .bucket_duration(10)
            .stats_window(10)
            .alert_window(120)
            .thresholds(10.0, 0.5)
            .build();

        assert_eq!(config.log_file, PathBuf::from("/var/log/apache2/access.log"));
        assert_eq!(config.bucket_duration_secs, Duration::from_secs(10));
        assert!(config.validate().is_ok());
        assert_eq!(config.bucket_count(config.alert_window_secs).unwrap().get(), 12);
    }

    #[test]
    fn test_app_config_from_file() {
        let config_content = r#"
        log_file: "/var/log/apache2/access.log"
        bucket_duration_secs: 10
        stats_window_secs: 10
        alert_window_secs: 120
        stats_interval_secs: 10
        alert_interval_secs: 1
        high_traffic_qps: 10
        low_traffic_qps: 0.5
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        let app_yaml_path = temp_dir.path().join("app.yaml");
        std::fs::write(&app_yaml_path, config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.log_file, PathBuf::from("/var/log/apache2/access.log"));
        assert_eq!(config.poll_interval_ms, Duration::from_millis(250));
        assert_eq!(config.stats_window_secs, Duration::from_secs(10));
        assert_eq!(config.alert_window_secs, Duration::from_secs(120));
        assert_eq!(config.high_traffic_qps, 10.0);
        assert_eq!(config.line_channel_capacity, 1024);
        assert_eq!(config.log_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_bucket_duration() {
        let config = AppConfig::builder().stats_window(10).alert_window(10).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_multiple_window() {
        let config = AppConfig::builder()
            .bucket_duration(10)
            .stats_window(25)
            .alert_window(120)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config =
            AppConfig::builder().bucket_duration(10).stats_window(0).alert_window(120).build();
        assert!(config.validate().is_err());
    }
}
