//! Time utilities for the Alien proxy

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// RFC 1123 format used by the HTTP `Date` header
const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Format a point in time for the HTTP `Date` header
pub fn http_date(at: SystemTime) -> String {
    let at: DateTime<Utc> = at.into();
    at.format(RFC1123_FORMAT).to_string()
}
