//! Terminal output sink.
//!
//! The console is a pure rendering sink: it drains the status channel (the
//! latest computed stats line) and the log channel (parse errors and alert
//! messages) and prints them in arrival order. No business logic lives here.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The sink task consuming formatted status and log strings.
pub struct Console {
    status_rx: mpsc::Receiver<String>,
    log_rx: mpsc::Receiver<String>,
    cancellation_token: CancellationToken,
}

impl Console {
    /// Creates a console draining the given channels until cancellation.
    pub fn new(
        status_rx: mpsc::Receiver<String>,
        log_rx: mpsc::Receiver<String>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { status_rx, log_rx, cancellation_token }
    }

    /// Runs the render loop until both channels close or shutdown is
    /// signalled.
    pub async fn run(mut self) {
        let mut status_open = true;
        let mut log_open = true;

        while status_open || log_open {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Console cancellation signal received, shutting down...");
                    break;
                }

                status = self.status_rx.recv(), if status_open => match status {
                    Some(line) => println!("status | {line}"),
                    None => status_open = false,
                },

                entry = self.log_rx.recv(), if log_open => match entry {
                    Some(line) => println!("log    | {line}"),
                    None => log_open = false,
                },
            }
        }
        tracing::info!("Console has shut down.");
    }
}
