//! Two-point "instant" rate of change.
//!
//! Deliberately cruder than the regression in `trend`: it only looks at the
//! oldest and newest of the last few readings. Both numbers are shown side by
//! side on the dashboard.

use chrono::{DateTime, Utc};

use crate::analysis::{newest_first, round_to};
use crate::models::{RateOfChange, Reading};

/// Number of most-recent readings the rate spans.
pub const RATE_SAMPLE: usize = 10;

const NO_RATE: RateOfChange = RateOfChange {
    rate_per_hour: 0.0,
    timestamp: None,
};

/// Level change per hour between the oldest and newest of the last
/// [`RATE_SAMPLE`] readings, rounded to two decimals.
///
/// Returns a zero rate with no timestamp when fewer than two readings exist
/// or when the two endpoints share a timestamp.
pub fn rate_of_change(readings: &[Reading], now: DateTime<Utc>) -> RateOfChange {
    // ---
    if readings.len() < 2 {
        return NO_RATE;
    }

    let sorted = newest_first(readings);
    let newest = sorted[0];
    let oldest = sorted[sorted.len().min(RATE_SAMPLE) - 1];

    let elapsed_minutes = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 60_000.0;
    if elapsed_minutes <= 0.0 {
        return NO_RATE;
    }

    let rate_per_hour = (newest.level - oldest.level) / elapsed_minutes * 60.0;
    RateOfChange {
        rate_per_hour: round_to(rate_per_hour, 2),
        timestamp: Some(now),
    }
}
