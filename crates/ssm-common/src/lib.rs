//! # SSM Common
//!
//! Logging configuration and small shared helpers for the SSM offline
//! cache controller crates.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, ParseLogFormatError};

/// Milliseconds since the Unix epoch, or zero if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
