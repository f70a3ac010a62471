//! Latest-reading staleness detection.
//!
//! The sensor normally reports every few minutes; a gap longer than the
//! threshold usually means the sensor or its uplink is down, which is easy to
//! miss on a dashboard that still shows the last good level.
//!
//! # Clock injection
//! All functions take `now` rather than calling `Utc::now()`, so results are
//! deterministic in tests. Recomputed on every request, no hysteresis.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default threshold, in minutes.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 7;

const STALE_MESSAGE_TEMPLATE: &str =
    "Sensor data may be stale: last reading received {minutes} minutes ago";

/// Surfaced when the newest reading is older than the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleWarning {
    pub minutes_since_reading: i64,
    pub message: String,
}

/// Returns a warning when `latest` is strictly more than `threshold_minutes`
/// whole minutes before `now`.
pub fn stale_warning(
    latest: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold_minutes: i64,
) -> Option<StaleWarning> {
    // ---
    let elapsed = (now - latest).num_minutes();
    (elapsed > threshold_minutes).then(|| StaleWarning {
        minutes_since_reading: elapsed,
        message: STALE_MESSAGE_TEMPLATE.replace("{minutes}", &elapsed.to_string()),
    })
}

/// Short relative age, e.g. "just now", "5 minutes ago", "2 hours ago".
pub fn describe_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    // ---
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} minutes ago");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} hours ago");
    }
    format!("{} days ago", hours / 24)
}
