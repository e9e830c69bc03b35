//! This module provides the `SupervisorBuilder` for constructing a `Supervisor`.

use std::sync::Arc;

use crate::{
    alerting::{AlertDirection, ThresholdAlert},
    config::AppConfig,
    stats::SlidingWindow,
    tailer::LineSource,
};

use super::{ALL_TRAFFIC_KEY, Supervisor, SupervisorError};

/// A builder for creating a `Supervisor` instance.
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<AppConfig>,
    source: Option<Box<dyn LineSource>>,
}

impl SupervisorBuilder {
    /// Creates a new, empty `SupervisorBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application configuration for the `Supervisor`.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the line source (normally the file tailer) for the `Supervisor`.
    pub fn source(mut self, source: Box<dyn LineSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Assembles and validates the components to build a `Supervisor`.
    ///
    /// This performs the final wiring: the windowing scheme is validated, the
    /// two counter windows are sized from the configured durations, and the
    /// high/low traffic alerts are bound to the traffic window with their
    /// per-second thresholds converted to absolute per-window counts.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        let config = self.config.ok_or(SupervisorError::MissingConfig)?;
        let source = self.source.ok_or(SupervisorError::MissingLineSource)?;

        config.validate().map_err(|e| SupervisorError::InvalidConfiguration(e.to_string()))?;

        let stats_buckets = config.bucket_count(config.stats_window_secs).ok_or_else(|| {
            SupervisorError::InvalidConfiguration(
                "stats window yields no buckets".to_string(),
            )
        })?;
        let alert_buckets = config.bucket_count(config.alert_window_secs).ok_or_else(|| {
            SupervisorError::InvalidConfiguration(
                "alert window yields no buckets".to_string(),
            )
        })?;

        let traffic_window = Arc::new(SlidingWindow::new(alert_buckets));
        let display_window = Arc::new(SlidingWindow::new(stats_buckets));

        // Thresholds are configured in queries per second; the alerts compare
        // against a cumulative per-window count.
        let alert_window_secs = config.alert_window_secs.as_secs() as f64;
        let high_threshold = (config.high_traffic_qps * alert_window_secs).round() as i64;
        let low_threshold = (config.low_traffic_qps * alert_window_secs).round() as i64;
        tracing::info!(
            high_threshold,
            low_threshold,
            alert_buckets = alert_buckets.get(),
            stats_buckets = stats_buckets.get(),
            "Windows and alert thresholds configured."
        );

        let alerts = vec![
            ThresholdAlert::new(
                high_threshold,
                AlertDirection::Above,
                Arc::clone(&traffic_window),
                ALL_TRAFFIC_KEY,
            ),
            ThresholdAlert::new(
                low_threshold,
                AlertDirection::Below,
                Arc::clone(&traffic_window),
                ALL_TRAFFIC_KEY,
            ),
        ];

        Ok(Supervisor::new(config, source, traffic_window, display_window, alerts))
    }
}
