//! Trend classification and time-to-warning estimation.
//!
//! The slope is an ordinary least-squares fit over the most recent readings
//! (minutes since the first sample on x, level on y). The countdown starts
//! from the single most recent level, not from the fitted line.

use crate::analysis::newest_first;
use crate::models::{Reading, TimeToWarning, Trend, TrendState};

/// Below this many readings the series is reported as stable.
pub const MIN_READINGS: usize = 5;

/// Number of most-recent readings considered.
pub const TREND_SAMPLE: usize = 10;

/// Upper bound on the regression window after sampling.
pub const REGRESSION_WINDOW: usize = 20;

/// Absolute rate (units per hour) below which the series counts as stable.
pub const STABLE_TOLERANCE_PER_HOUR: f64 = 0.05;

/// Absorbs regression round-off so 119.999999 minutes counts as 120.
const FLOOR_EPSILON: f64 = 1e-6;

const MINUTES_PER_DAY: i64 = 1440;
const MINUTES_PER_HOUR: i64 = 60;

/// Classify the recent trajectory of `readings` and estimate the time until
/// `warning_level` is reached.
///
/// Input order does not matter. With fewer than [`MIN_READINGS`] readings the
/// result is stable with no estimate.
pub fn estimate_trend(readings: &[Reading], warning_level: f64) -> TrendState {
    // ---
    if readings.len() < MIN_READINGS {
        return TrendState::default();
    }

    let sorted = newest_first(readings);
    let current_level = sorted[0].level;

    // Oldest first for the regression.
    let mut window: Vec<&Reading> = sorted.into_iter().take(TREND_SAMPLE).collect();
    window.reverse();
    let start = window.len().saturating_sub(REGRESSION_WINDOW);
    let window = &window[start..];

    let rate_per_minute = regression_slope(window);
    let rate_per_hour = rate_per_minute * 60.0;

    let trend = classify(rate_per_hour);
    let time_to_warning = match trend {
        Trend::Rising if current_level < warning_level => {
            let minutes_to_warning = (warning_level - current_level) / rate_per_minute;
            if minutes_to_warning > 0.0 && minutes_to_warning.is_finite() {
                decompose((minutes_to_warning + FLOOR_EPSILON).floor() as i64)
            } else {
                TimeToWarning::STABLE
            }
        }
        _ => TimeToWarning::STABLE,
    };

    TrendState {
        trend,
        rate_per_hour,
        time_to_warning,
    }
}

/// Least-squares slope in level units per minute. Zero when every sample
/// shares the same timestamp.
fn regression_slope(window: &[&Reading]) -> f64 {
    // ---
    let Some(first) = window.first() else {
        return 0.0;
    };
    let origin = first.timestamp;
    let n = window.len() as f64;

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for reading in window {
        let x = (reading.timestamp - origin).num_milliseconds() as f64 / 60_000.0;
        let y = reading.level;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

fn classify(rate_per_hour: f64) -> Trend {
    // ---
    if rate_per_hour.abs() < STABLE_TOLERANCE_PER_HOUR {
        Trend::Stable
    } else if rate_per_hour > 0.0 {
        Trend::Rising
    } else {
        Trend::Falling
    }
}

/// Split a countdown into days/hours/minutes, hiding leading zero units.
///
/// Days show only when positive, hours when positive or days are shown, and
/// minutes when positive or nothing else is shown.
fn decompose(total_minutes: i64) -> TimeToWarning {
    // ---
    let days = total_minutes / MINUTES_PER_DAY;
    let hours = (total_minutes % MINUTES_PER_DAY) / MINUTES_PER_HOUR;
    let minutes = total_minutes % MINUTES_PER_HOUR;

    TimeToWarning {
        days: (days > 0).then_some(days),
        hours: (hours > 0 || days > 0).then_some(hours),
        minutes: (minutes > 0 || (days == 0 && hours == 0)).then_some(minutes),
        is_stable: false,
    }
}
