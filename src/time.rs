//! Timestamp formatting shared by the Store, the Job State Directory, and the API.
//!
//! Every timestamp this system emits is RFC 3339, UTC, millisecond precision,
//! with a literal `Z` suffix (e.g. `2024-05-01T12:34:56.000Z`), matching the
//! original `_now_utc` / `_format_timestamp` helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// The current instant, formatted per the system's timestamp convention.
pub fn now_rfc3339_millis() -> String {
    format_rfc3339_millis(Utc::now())
}

/// Format any UTC instant per the system's timestamp convention.
pub fn format_rfc3339_millis(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The current instant truncated to whole seconds, matching the Store row's
/// `created_at` resolution (the keyset cursor is built from this value).
pub fn now_truncated_to_secs() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}
