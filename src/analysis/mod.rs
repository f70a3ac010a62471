//! Derived analytics over already-fetched readings.
//!
//! Everything here is pure: no I/O, no clock reads. Callers pass `now` in,
//! and insufficient or degenerate input produces a defined fallback value
//! rather than an error.
//!
//! Submodules:
//! - `trend`: regression-based trend and time-to-warning estimate.
//! - `rate`: two-point instant rate of change.
//! - `staleness`: latest-reading age check and age formatting.
//! - `daily`: daily average / peak analytics, level status, per-day series.
//! - `votes`: community rain-vote tally.

pub mod daily;
pub mod rate;
pub mod staleness;
pub mod trend;
pub mod votes;

use crate::models::Reading;

/// Round half up to `decimals` places (`-2.345` rounds to `-2.34`).
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    // ---
    let scale = 10f64.powi(decimals);
    (value * scale + 0.5).floor() / scale
}

/// Copy of `readings` ordered most-recent-first, ties broken by id.
///
/// The store already returns this order, but derived computations do not
/// rely on it.
pub(crate) fn newest_first(readings: &[Reading]) -> Vec<&Reading> {
    // ---
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    sorted
}
