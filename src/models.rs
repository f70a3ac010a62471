//! Data models for the flood monitoring service.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Raw `water_readings` row as returned by the store.
///
/// Every column is optional here; rows are validated into [`Reading`] at the
/// ingestion boundary so a malformed row never reaches the estimator.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct RawReading {
    // ---
    pub id: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<f64>,
    pub temperature: Option<f64>,
    pub sensor_id: Option<String>,
}

/// A single water-level sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Water height in centimeters.
    pub level: f64,
    pub temperature: Option<f64>,
    pub sensor_id: String,
}

impl RawReading {
    // ---
    /// Validate a raw row. Returns `None` when a required column is missing
    /// or the level is not a finite number.
    pub fn validate(self) -> Option<Reading> {
        // ---
        let level = self.level.filter(|l| l.is_finite())?;

        Some(Reading {
            id: self.id?,
            timestamp: self.timestamp?,
            level,
            temperature: self.temperature.filter(|t| t.is_finite()),
            sensor_id: self.sensor_id.unwrap_or_default(),
        })
    }
}

/// User-configurable thresholds, persisted as `{warningLevel, dangerLevel, updateInterval}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningLevels {
    // ---
    pub warning_level: f64,
    pub danger_level: f64,
    /// Seconds; surfaced to the dashboard, the sync poll period is fixed.
    pub update_interval: u32,
}

impl Default for WarningLevels {
    fn default() -> Self {
        Self {
            warning_level: 20.0,
            danger_level: 40.0,
            update_interval: 30,
        }
    }
}

/// Coarse classification of the recent level slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Estimated time until the warning level is reached.
///
/// `is_stable` is true whenever no countdown applies; in that case every
/// component is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeToWarning {
    // ---
    pub days: Option<i64>,
    pub hours: Option<i64>,
    pub minutes: Option<i64>,
    pub is_stable: bool,
}

impl TimeToWarning {
    pub const STABLE: TimeToWarning = TimeToWarning {
        days: None,
        hours: None,
        minutes: None,
        is_stable: true,
    };
}

impl Default for TimeToWarning {
    fn default() -> Self {
        Self::STABLE
    }
}

impl fmt::Display for TimeToWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        if self.is_stable {
            return write!(f, "Stable");
        }

        let units = [
            (self.days, "day"),
            (self.hours, "hour"),
            (self.minutes, "minute"),
        ];
        let mut parts = Vec::new();
        for (value, unit) in units {
            // Zero-valued trailing units are suppressed unless nothing else is shown.
            if let Some(v) = value {
                if v > 0 || (unit == "minute" && parts.is_empty()) {
                    let plural = if v == 1 { "" } else { "s" };
                    parts.push(format!("{v} {unit}{plural}"));
                }
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Output of the trend estimator. Fully recomputed on every batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendState {
    // ---
    pub trend: Trend,
    /// Regression slope in level units per hour.
    pub rate_per_hour: f64,
    pub time_to_warning: TimeToWarning,
}

impl Default for TrendState {
    fn default() -> Self {
        Self {
            trend: Trend::Stable,
            rate_per_hour: 0.0,
            time_to_warning: TimeToWarning::STABLE,
        }
    }
}

/// Two-point "instant" rate over the last few readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOfChange {
    // ---
    pub rate_per_hour: f64,
    /// Computation time; `None` when no rate could be computed.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Average and peak level over a set of readings, rounded to one decimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterAnalytics {
    // ---
    pub daily_average: f64,
    pub peak_level: f64,
}

/// Status band of the current level against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelStatus {
    Normal,
    Warning,
    Danger,
}

/// Mean level for one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLevel {
    pub date: NaiveDate,
    pub level: f64,
    pub readings: usize,
}

/// Per-day means plus the look-back window they were drawn from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySeries {
    /// 7, or 30 when the past week had no readings.
    pub window_days: i64,
    pub days: Vec<DailyLevel>,
}

/// One community "is it raining?" vote. `None` means unsure.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WeatherVote {
    pub is_raining: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Rain vote tally over the recent window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub total_votes: usize,
    /// Votes that are not unsure.
    pub total_valid_votes: usize,
    pub rain_votes: usize,
    pub rain_percentage: i64,
    pub is_raining: bool,
}
