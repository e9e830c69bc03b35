//! Common Log Format parsing.
//!
//! A stateless extractor: one raw access-log line in, one [`LogRecord`] or a
//! [`ParseError`] out. Malformed input is reported, never panicked on, so a
//! partial line read mid-write upstream simply surfaces as a parse error.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use thiserror::Error;

// Common Log Format:  %h     %l    %u     %t            "%m     %U%q   %H"    %>s     %b
// Capture group:      1                   2              3      4             5       6
static CLF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([^ ]+) [^ ]+ [^ ]+ \[([^\]]+)\] "([A-Z]+) ([^ ]+) [^"]+" ([0-9]+) ([0-9]+)$"#)
        .expect("CLF pattern is valid")
});

/// Timestamp layout used inside the bracketed CLF field.
const CLF_TIMESTAMP: &str = "%d/%b/%Y:%H:%M:%S %z";

/// One structured request record extracted from an access-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Request time, with the offset given in the log line.
    pub timestamp: DateTime<FixedOffset>,
    /// Client address.
    pub ip_addr: String,
    /// HTTP method.
    pub method: String,
    /// Path component of the request target, query string stripped.
    pub path: String,
    /// HTTP status code.
    pub status: u16,
    /// Response size in bytes.
    pub size: u64,
}

/// Errors produced while extracting a record from a log line.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The line does not match the Common Log Format.
    #[error("failed to parse line: {0}")]
    Malformed(String),

    /// The bracketed timestamp field is not a valid CLF timestamp.
    #[error("invalid timestamp '{0}': {1}")]
    Timestamp(String, #[source] chrono::ParseError),

    /// The status field is not a valid HTTP status code.
    #[error("invalid status code '{0}'")]
    Status(String),

    /// The size field does not fit a byte count.
    #[error("invalid response size '{0}'")]
    Size(String),
}

/// Parses one Common Log Format line into a [`LogRecord`].
pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    let captures = CLF.captures(line).ok_or_else(|| ParseError::Malformed(line.to_string()))?;

    let timestamp = DateTime::parse_from_str(&captures[2], CLF_TIMESTAMP)
        .map_err(|source| ParseError::Timestamp(captures[2].to_string(), source))?;

    let target = &captures[4];
    let path = target.split('?').next().unwrap_or(target).to_string();

    let status =
        captures[5].parse::<u16>().map_err(|_| ParseError::Status(captures[5].to_string()))?;
    let size = captures[6].parse::<u64>().map_err(|_| ParseError::Size(captures[6].to_string()))?;

    Ok(LogRecord {
        timestamp,
        ip_addr: captures[1].to_string(),
        method: captures[3].to_string(),
        path,
        status,
        size,
    })
}

/// Returns the first segment of a path, used as the per-section aggregation
/// key: `/pages/create` reports as `/pages`, a bare `/x` as itself.
pub fn path_section(path: &str) -> &str {
    match path.strip_prefix('/') {
        Some(rest) => match rest.find('/') {
            Some(index) => &path[..index + 1],
            None => path,
        },
        None => path,
    }
}
