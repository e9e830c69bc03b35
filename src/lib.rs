#![warn(missing_docs)]
//! Vigil tails a web-server access log and keeps a live view of the traffic:
//! sliding-window request statistics, plus high/low traffic alerts with
//! hysteresis so a sustained condition notifies exactly once.

pub mod alerting;
pub mod config;
pub mod console;
pub mod parser;
pub mod stats;
pub mod supervisor;
pub mod tailer;
