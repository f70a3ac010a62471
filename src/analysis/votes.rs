//! Community rain-vote tally.

use chrono::{DateTime, Duration, Utc};

use crate::analysis::round_to;
use crate::models::{VoteTally, WeatherVote};

/// Only votes cast within this many minutes of `now` count.
pub const VOTE_WINDOW_MINUTES: i64 = 30;

/// Rain is reported once strictly more than this share of decided votes say so.
const MAJORITY_PERCENT: i64 = 50;

/// Start of the counting window ending at `now`.
pub fn vote_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(VOTE_WINDOW_MINUTES)
}

/// Tally the votes cast in the window ending at `now`.
///
/// Unsure votes count toward `total_votes` only; the percentage is taken over
/// decided votes and is 0 when there are none.
pub fn tally_votes(votes: &[WeatherVote], now: DateTime<Utc>) -> VoteTally {
    // ---
    let since = vote_window_start(now);
    let recent: Vec<&WeatherVote> = votes.iter().filter(|v| v.created_at >= since).collect();

    let total_valid_votes = recent.iter().filter(|v| v.is_raining.is_some()).count();
    let rain_votes = recent.iter().filter(|v| v.is_raining == Some(true)).count();
    let rain_percentage = if total_valid_votes > 0 {
        round_to(rain_votes as f64 / total_valid_votes as f64 * 100.0, 0) as i64
    } else {
        0
    };

    VoteTally {
        total_votes: recent.len(),
        total_valid_votes,
        rain_votes,
        rain_percentage,
        is_raining: rain_percentage > MAJORITY_PERCENT,
    }
}
