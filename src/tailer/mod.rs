//! Polling file tailer.
//!
//! [`FileTailer`] follows a growing log file, starting from the current end
//! so historical content is skipped. At end-of-file it polls for growth
//! instead of erroring; only a genuine I/O failure is terminal. A line read
//! that races a partial write is handed to the caller as-is and will be
//! reported downstream as malformed.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
};

/// Errors produced by a line source.
#[derive(Debug, Error)]
pub enum TailError {
    /// The log file could not be opened at startup.
    #[error("failed to open log file '{path}': {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file became unreadable mid-tail. End-of-file is not an error (it
    /// triggers polling); anything else is terminal for ingestion.
    #[error("log file became unreadable: {0}")]
    Io(#[from] std::io::Error),
}

/// A blocking producer of log lines.
///
/// The pipeline's ingestion task drives this in a loop; an error return is
/// permanent and shuts the pipeline down.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LineSource: Send {
    /// Waits for and returns the next line, without its trailing newline.
    async fn next_line(&mut self) -> Result<String, TailError>;
}

/// A [`LineSource`] that follows an append-only file on disk.
pub struct FileTailer {
    path: PathBuf,
    reader: BufReader<File>,
    /// Bytes consumed so far, compared against the held handle's length to
    /// detect growth and truncation while polling.
    offset: u64,
    poll_interval: Duration,
}

impl FileTailer {
    /// Opens `path` and seeks to its end, so tailing starts from fresh data.
    ///
    /// The seek may land mid-record if a write is in flight; the fragment
    /// read after it will fail parsing downstream and the next full record
    /// resumes normally.
    pub async fn open(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self, TailError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .await
            .map_err(|source| TailError::Open { path: path.clone(), source })?;
        let offset = file.seek(SeekFrom::End(0)).await?;
        Ok(Self { path, reader: BufReader::new(file), offset, poll_interval })
    }

    /// Sleeps in `poll_interval` steps until there is new data to read.
    ///
    /// Growth and truncation are judged against the held handle, not the
    /// path: a handle that shrank was truncated in place and is re-read from
    /// the start. When the held file stops growing because the path now
    /// refers to a different file (rename-style rotation), the new file is
    /// opened and followed from its beginning; the rotated-away handle's
    /// history is never replayed.
    async fn wait_for_growth(&mut self) -> Result<(), TailError> {
        loop {
            let held = self.reader.get_ref().metadata().await?;
            if held.len() < self.offset {
                tracing::warn!(path = %self.path.display(), "Log file truncated; re-reading from the start.");
                self.reader.seek(SeekFrom::Start(0)).await?;
                self.offset = 0;
                return Ok(());
            }
            if held.len() > self.offset {
                return Ok(());
            }

            match tokio::fs::metadata(&self.path).await {
                Ok(current) if !same_file(&held, &current) => {
                    tracing::warn!(path = %self.path.display(), "Log file rotated; following the new file from the start.");
                    let file = File::open(&self.path).await?;
                    self.reader = BufReader::new(file);
                    self.offset = 0;
                    return Ok(());
                }
                Ok(_) => {}
                // The path can be briefly absent mid-rotation; keep polling
                // the held handle until the new file appears.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Whether two metadata snapshots describe the same underlying file.
#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Without inode identity, rotation cannot be told apart from in-place
/// writes; only handle-based truncation detection applies.
#[cfg(not(unix))]
fn same_file(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    true
}

#[async_trait]
impl LineSource for FileTailer {
    async fn next_line(&mut self) -> Result<String, TailError> {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            self.offset += read as u64;

            if read == 0 {
                self.wait_for_growth().await?;
                continue;
            }

            // A line without a trailing newline is a fragment read mid-write;
            // it is surfaced anyway and dropped as malformed downstream.
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            return Ok(line);
        }
    }
}
