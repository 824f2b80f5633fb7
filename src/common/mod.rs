//! Common utilities shared by the CLI and the run pipeline

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

use std::time::Duration;

pub use error::{Error, Result};

/// Format a duration for progress lines, e.g. `1 hour 2 minutes 3 seconds`.
///
/// Sub-second durations render as `0 seconds`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(plural(seconds, "second"));
    }
    parts.join(" ")
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Format milliseconds as a clock reading: `m:ss.mmm`, or `h:m:ss.mmm`
/// once the duration reaches an hour.
pub fn format_clock(millis: u64) -> String {
    let ms = millis % 1000;
    let total_secs = millis / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    if hours > 0 {
        format!("{}:{}:{:02}.{:03}", hours, mins, secs, ms)
    } else {
        format!("{}:{:02}.{:03}", mins, secs, ms)
    }
}
