//! The Supervisor owns the monitoring pipeline and manages its lifecycle.
//!
//! Five independently scheduled tasks share the two counter windows: the
//! ingest task pulls lines from the tailer into a bounded channel, the
//! aggregate task parses them and mutates the windows, and three periodic
//! tasks rotate buckets, evaluate alerts, and recompute the status line. A
//! sixth task, the console, renders the status and log channels. All
//! cross-task communication goes through channels or a per-window mutex; no
//! task ever blocks on another directly, and no operation holds two window
//! locks at once.

mod builder;

use std::sync::Arc;

pub use builder::SupervisorBuilder;
use thiserror::Error;
use tokio::{signal, sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    alerting::ThresholdAlert,
    config::AppConfig,
    console::Console,
    parser::{self, LogRecord},
    stats::{CounterSet, SlidingWindow, StatsError},
    tailer::LineSource,
};

/// Counter key for raw request volume in the traffic window.
pub const ALL_TRAFFIC_KEY: &str = "all";
/// Counter key for request volume in the display window.
pub const HITS_KEY: &str = "hits";
/// Counter key for non-200 responses in the display window.
pub const ERRORS_KEY: &str = "errors";
/// Counter key for response bytes in the display window.
pub const BYTES_KEY: &str = "bytes";
/// Prefix for per-section request counters in the display window.
pub const PATH_KEY_PREFIX: &str = "path:";

// Status lines supersede each other, so the channel only needs enough slack
// to absorb a briefly stalled console.
const STATUS_CHANNEL_CAPACITY: usize = 8;

/// Represents the set of errors that can occur during the supervisor's
/// operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required configuration was not provided to the `SupervisorBuilder`.
    #[error("Missing configuration for Supervisor")]
    MissingConfig,

    /// A line source was not provided to the `SupervisorBuilder`.
    #[error("Missing line source for Supervisor")]
    MissingLineSource,

    /// An error occurred due to an invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// The primary runtime manager for the application.
///
/// The Supervisor owns the line source, both counter windows, and the alert
/// instances; `run` spawns every pipeline task and becomes the main process
/// loop. There is no module-level state anywhere: everything the tasks share
/// is constructed here and passed in explicitly.
pub struct Supervisor {
    /// Shared application configuration.
    config: Arc<AppConfig>,

    /// The source of raw log lines (normally a [`crate::tailer::FileTailer`]).
    source: Box<dyn LineSource>,

    /// Window backing alert evaluation, keyed only by [`ALL_TRAFFIC_KEY`].
    traffic_window: Arc<SlidingWindow>,

    /// Window backing the status display, keyed by hit/error/byte counters
    /// and per-section request counts.
    display_window: Arc<SlidingWindow>,

    /// Configured alert instances, each with wholly independent state.
    alerts: Vec<ThresholdAlert>,

    /// A token used to signal a graceful shutdown to all supervised tasks.
    cancellation_token: CancellationToken,

    /// A set of all spawned tasks that the supervisor is actively managing.
    join_set: JoinSet<()>,
}

impl Supervisor {
    /// Creates a new Supervisor instance with all its required components.
    ///
    /// This is typically called by the `SupervisorBuilder` after it has
    /// assembled all the necessary dependencies.
    pub fn new(
        config: AppConfig,
        source: Box<dyn LineSource>,
        traffic_window: Arc<SlidingWindow>,
        display_window: Arc<SlidingWindow>,
        alerts: Vec<ThresholdAlert>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            traffic_window,
            display_window,
            alerts,
            cancellation_token: CancellationToken::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Returns a new `SupervisorBuilder` instance.
    ///
    /// This is the public entry point for creating a supervisor.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// The window backing alert evaluation.
    pub fn traffic_window(&self) -> Arc<SlidingWindow> {
        Arc::clone(&self.traffic_window)
    }

    /// The window backing the status display.
    pub fn display_window(&self) -> Arc<SlidingWindow> {
        Arc::clone(&self.display_window)
    }

    /// Starts the supervisor and all its managed services.
    ///
    /// Spawns the signal handler, the console sink, and the five pipeline
    /// tasks, then loops monitoring task health until shutdown. A failed task
    /// or a fatal ingestion error cancels every other task; end of input on
    /// the line source terminates the pipeline the same way.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        // Clone the token for the signal handler task.
        let cancellation_token = self.cancellation_token.clone();

        // Spawn a task to listen for shutdown signals.
        self.join_set.spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler")
                    .recv()
                    .await;
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT (Ctrl+C) received, initiating graceful shutdown."),
                _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown."),
                _ = cancellation_token.cancelled() => {}
            }

            // Notify all other tasks to begin shutting down.
            cancellation_token.cancel();
        });

        // --- Channel wiring ---

        // Raw lines from the tailer to the aggregate task.
        let (lines_tx, mut lines_rx) = mpsc::channel::<String>(self.config.line_channel_capacity);

        // Parse errors and alert messages, rendered by the console.
        let (log_tx, log_rx) = mpsc::channel::<String>(self.config.log_channel_capacity);

        // The latest computed status line, rendered by the console.
        let (status_tx, status_rx) = mpsc::channel::<String>(STATUS_CHANNEL_CAPACITY);

        // --- Task spawning ---

        // Spawn the console sink.
        let console = Console::new(status_rx, log_rx, self.cancellation_token.clone());
        self.join_set.spawn(console.run());

        // Spawn the ingest task: tailer -> line channel. A tailer error is
        // terminal for the whole pipeline.
        let mut source = self.source;
        let ingest_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = ingest_token.cancelled() => {
                        tracing::info!("Ingest cancellation signal received, shutting down...");
                        break;
                    }

                    line = source.next_line() => match line {
                        Ok(line) => {
                            if lines_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Log ingestion failed; shutting down the pipeline.");
                            ingest_token.cancel();
                            break;
                        }
                    }
                }
            }
        });

        // Spawn the aggregate task: line channel -> window mutations. It
        // drains the channel to the end even during shutdown, then cancels
        // the periodic tasks; end of input terminates the pipeline.
        let traffic = Arc::clone(&self.traffic_window);
        let display = Arc::clone(&self.display_window);
        let aggregate_log_tx = log_tx.clone();
        let aggregate_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            loop {
                let Some(line) = lines_rx.recv().await else {
                    tracing::info!("Line channel closed; aggregation finished.");
                    break;
                };
                match parser::parse_line(&line) {
                    Ok(record) => {
                        if let Err(e) = apply_record(&traffic, &display, &record) {
                            tracing::error!(error = %e, "Counter window defect while aggregating; shutting down.");
                            break;
                        }
                    }
                    Err(e) => {
                        if aggregate_log_tx.send(e.to_string()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            aggregate_token.cancel();
        });

        // Spawn the rotation task: every bucket duration, expire the oldest
        // bucket of every window.
        let windows = [Arc::clone(&self.traffic_window), Arc::clone(&self.display_window)];
        let bucket_duration = self.config.bucket_duration_secs;
        let rotation_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = rotation_token.cancelled() => {
                        tracing::info!("Rotation cancellation signal received, shutting down...");
                        break;
                    }

                    _ = tokio::time::sleep(bucket_duration) => {
                        for window in &windows {
                            if let Err(e) = window.rotate() {
                                tracing::error!(error = %e, "Bucket rotation hit an internal defect; shutting down.");
                                rotation_token.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        });

        // Spawn the alert evaluation task.
        let mut alerts = self.alerts;
        let alert_interval = self.config.alert_interval_secs;
        let alert_log_tx = log_tx;
        let alert_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = alert_token.cancelled() => {
                        tracing::info!("Alert evaluation cancellation signal received, shutting down...");
                        break;
                    }

                    _ = tokio::time::sleep(alert_interval) => {
                        for alert in &mut alerts {
                            match alert.evaluate() {
                                Ok(Some(message)) => {
                                    if alert_log_tx.send(message).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::error!(error = %e, "Alert evaluation hit an internal defect; shutting down.");
                                    alert_token.cancel();
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        // Spawn the status display task.
        let status_display = Arc::clone(&self.display_window);
        let stats_interval = self.config.stats_interval_secs;
        let window_secs = self.config.stats_window_secs.as_secs().max(1);
        let status_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = status_token.cancelled() => {
                        tracing::info!("Status display cancellation signal received, shutting down...");
                        break;
                    }

                    _ = tokio::time::sleep(stats_interval) => {
                        match status_display.snapshot() {
                            Ok(snapshot) => {
                                let line = format_status(&snapshot, window_secs);
                                if status_tx.send(line).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Status computation hit an internal defect; shutting down.");
                                status_token.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        });

        // --- Main supervisor loop ---
        // Only responsible for monitoring task health and shutdown signals.

        loop {
            tokio::select! {
                maybe_result = self.join_set.join_next() => {
                    match maybe_result {
                        Some(Ok(_)) => {
                            // Task completed, continue monitoring the rest.
                        }
                        Some(Err(e)) => {
                            tracing::error!("A critical task failed: {:?}. Initiating shutdown.", e);
                            self.cancellation_token.cancel();
                        }
                        None => {
                            // All tasks have completed.
                            break;
                        }
                    }
                }
                _ = self.cancellation_token.cancelled() => {
                    break;
                }
            }
        }

        // --- Graceful shutdown ---

        // Every task observes the cancellation token, and the aggregate task
        // finishes draining the line channel before it exits. Give them all a
        // bounded window to wind down before aborting whatever remains.
        let shutdown_timeout = self.config.shutdown_timeout;
        let drain = async {
            while self.join_set.join_next().await.is_some() {}
        };
        if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
            tracing::warn!(
                "Tasks did not drain within {:?}. Aborting the stragglers.",
                shutdown_timeout
            );
        }
        self.join_set.shutdown().await;

        tracing::info!("All supervised tasks have completed.");
        tracing::info!("Supervisor shutdown complete.");
        Ok(())
    }
}

/// Applies one parsed request record to both counter windows.
///
/// The traffic window takes a single hit under [`ALL_TRAFFIC_KEY`]; the
/// display window takes the hit/error/byte counters plus a per-section count.
/// The two windows are independent locks, taken one after the other.
pub fn apply_record(
    traffic: &SlidingWindow,
    display: &SlidingWindow,
    record: &LogRecord,
) -> Result<(), StatsError> {
    traffic.mutate(|set| set.add(ALL_TRAFFIC_KEY, 1))?;

    let section_key = format!("{PATH_KEY_PREFIX}{}", parser::path_section(&record.path));
    let is_error = record.status != 200;
    let bytes = record.size as i64;
    display.mutate(|set| {
        set.add(HITS_KEY, 1);
        if is_error {
            set.add(ERRORS_KEY, 1);
        }
        set.add(BYTES_KEY, bytes);
        set.add(&section_key, 1);
    })
}

/// Formats one status line from a display-window snapshot.
///
/// Requests per second are the window hit count over the full window length;
/// the error ratio guards division by zero; the top section is the
/// `path:`-keyed counter with the strictly greatest count, first encountered
/// winning ties.
pub fn format_status(snapshot: &CounterSet, window_secs: u64) -> String {
    let hits = snapshot.get(HITS_KEY);
    let errors = snapshot.get(ERRORS_KEY);
    let bytes = snapshot.get(BYTES_KEY);

    let rate = hits as f64 / window_secs as f64;
    let error_ratio = if hits > 0 { errors as f64 / hits as f64 } else { 0.0 };

    let mut top: Option<(&str, i64)> = None;
    for (key, count) in snapshot.iter() {
        if let Some(section) = key.strip_prefix(PATH_KEY_PREFIX) {
            if top.map_or(true, |(_, best)| count > best) {
                top = Some((section, count));
            }
        }
    }
    let top_section = match top {
        Some((section, count)) => format!("{section} ({count} hits)"),
        None => "n/a".to_string(),
    };

    format!(
        "req/s: {rate:.2} | errors: {:.1}% | bytes: {bytes} | top section: {top_section}",
        error_ratio * 100.0
    )
}
