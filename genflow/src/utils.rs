//! Id and timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Generates a time-ordered request id (UUID v7).
#[must_use]
pub fn generate_request_id() -> Uuid {
    Uuid::now_v7()
}

/// Current UTC time.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a timestamp as RFC 3339 with millisecond precision.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use genflow::utils::iso_timestamp;
///
/// let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
/// assert_eq!(iso_timestamp(&at), "2026-10-19T08:30:00.000Z");
/// ```
#[must_use]
pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds between two timestamps, clamped at zero.
#[must_use]
pub fn elapsed_ms(from: &DateTime<Utc>, to: &DateTime<Utc>) -> u64 {
    u64::try_from((*to - *from).num_milliseconds()).unwrap_or(0)
}
