//! Daily average / peak analytics and threshold status.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::analysis::round_to;
use crate::models::{DailyLevel, DailySeries, LevelStatus, Reading, WaterAnalytics, WarningLevels};

/// Look-back for the per-day series.
pub const SERIES_WINDOW_DAYS: i64 = 7;

/// Wider look-back used when the past week is empty.
pub const SERIES_FALLBACK_DAYS: i64 = 30;

/// Average and peak level over every reading given, rounded to one decimal.
pub fn summarize(readings: &[Reading]) -> WaterAnalytics {
    // ---
    if readings.is_empty() {
        return WaterAnalytics::default();
    }

    let sum: f64 = readings.iter().map(|r| r.level).sum();
    let peak = readings
        .iter()
        .map(|r| r.level)
        .fold(f64::NEG_INFINITY, f64::max);

    WaterAnalytics {
        daily_average: round_to(sum / readings.len() as f64, 1),
        peak_level: round_to(peak, 1),
    }
}

/// Analytics over the readings from the current local calendar day.
///
/// Falls back to every reading when none fall on today, so a sensor that
/// went quiet overnight still shows its last known figures.
pub fn daily_analytics(readings: &[Reading], now: DateTime<FixedOffset>) -> WaterAnalytics {
    // ---
    let today_start = start_of_day(now.date_naive(), *now.offset());
    let today: Vec<Reading> = readings
        .iter()
        .filter(|r| r.timestamp >= today_start)
        .cloned()
        .collect();

    if today.is_empty() {
        summarize(readings)
    } else {
        summarize(&today)
    }
}

/// Classify `level`, checking the danger threshold first.
pub fn level_status(level: f64, levels: &WarningLevels) -> LevelStatus {
    // ---
    if level >= levels.danger_level {
        LevelStatus::Danger
    } else if level >= levels.warning_level {
        LevelStatus::Warning
    } else {
        LevelStatus::Normal
    }
}

/// UTC bounds covering `start` 00:00:00 through `end` 23:59:59.999 local time.
pub fn day_bounds(
    start: NaiveDate,
    end: NaiveDate,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    // ---
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    let to_utc = |date: NaiveDate, time: NaiveTime| {
        offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| date.and_time(time).and_utc())
    };

    (to_utc(start, NaiveTime::MIN), to_utc(end, end_of_day))
}

/// Mean level per local calendar day, oldest day first.
pub fn group_by_day(readings: &[Reading], offset: FixedOffset) -> Vec<DailyLevel> {
    // ---
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for r in readings {
        let date = r.timestamp.with_timezone(&offset).date_naive();
        let entry = days.entry(date).or_insert((0.0, 0));
        entry.0 += r.level;
        entry.1 += 1;
    }

    days.into_iter()
        .map(|(date, (sum, count))| DailyLevel {
            date,
            level: round_to(sum / count as f64, 1),
            readings: count,
        })
        .collect()
}

/// Per-day means over the past week, or the past 30 days when the week is empty.
pub fn daily_series(readings: &[Reading], now: DateTime<FixedOffset>) -> DailySeries {
    // ---
    let now_utc = now.with_timezone(&Utc);
    let since = |days: i64| -> Vec<Reading> {
        let start = now_utc - Duration::days(days);
        readings
            .iter()
            .filter(|r| r.timestamp >= start)
            .cloned()
            .collect()
    };

    let week = since(SERIES_WINDOW_DAYS);
    let (window_days, window) = if week.is_empty() {
        (SERIES_FALLBACK_DAYS, since(SERIES_FALLBACK_DAYS))
    } else {
        (SERIES_WINDOW_DAYS, week)
    };

    DailySeries {
        window_days,
        days: group_by_day(&window, *now.offset()),
    }
}

fn start_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    day_bounds(date, date, offset).0
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn bangkok() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn reading(id: i64, rfc3339: &str, level: f64) -> Reading {
        // ---
        Reading {
            id,
            timestamp: DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc),
            level,
            temperature: None,
            sensor_id: "raspberry_pi_1".to_string(),
        }
    }

    #[test]
    fn test_summarize_rounds_to_one_decimal() {
        // ---
        let readings = vec![
            reading(1, "2025-09-14T08:00:00+07:00", 10.04),
            reading(2, "2025-09-14T08:05:00+07:00", 12.0),
            reading(3, "2025-09-14T08:10:00+07:00", 14.26),
        ];
        let analytics = summarize(&readings);

        assert_eq!(analytics.daily_average, 12.1);
        assert_eq!(analytics.peak_level, 14.3);
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]), WaterAnalytics::default());
    }

    #[test]
    fn test_daily_analytics_uses_local_day_only() {
        // ---
        // 23:30 local yesterday is 16:30 UTC; it must not count toward today.
        let readings = vec![
            reading(3, "2025-09-14T09:00:00+07:00", 10.0),
            reading(2, "2025-09-14T00:10:00+07:00", 20.0),
            reading(1, "2025-09-13T23:30:00+07:00", 90.0),
        ];
        let now = DateTime::parse_from_rfc3339("2025-09-14T10:00:00+07:00").unwrap();
        let analytics = daily_analytics(&readings, now);

        assert_eq!(analytics.daily_average, 15.0);
        assert_eq!(analytics.peak_level, 20.0);
    }

    #[test]
    fn test_daily_analytics_falls_back_to_all_readings() {
        // ---
        let readings = vec![
            reading(2, "2025-09-12T09:00:00+07:00", 30.0),
            reading(1, "2025-09-12T08:00:00+07:00", 10.0),
        ];
        let now = DateTime::parse_from_rfc3339("2025-09-14T10:00:00+07:00").unwrap();
        let analytics = daily_analytics(&readings, now);

        assert_eq!(analytics.daily_average, 20.0);
        assert_eq!(analytics.peak_level, 30.0);
    }

    #[test]
    fn test_level_status_checks_danger_first() {
        // ---
        let levels = WarningLevels::default();
        assert_eq!(level_status(5.0, &levels), LevelStatus::Normal);
        assert_eq!(level_status(20.0, &levels), LevelStatus::Warning);
        assert_eq!(level_status(40.0, &levels), LevelStatus::Danger);

        // Inverted thresholds still report danger.
        let inverted = WarningLevels {
            warning_level: 50.0,
            danger_level: 30.0,
            update_interval: 30,
        };
        assert_eq!(level_status(35.0, &inverted), LevelStatus::Danger);
    }

    #[test]
    fn test_day_bounds_cover_whole_local_days() {
        // ---
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 9, 3).unwrap();
        let (from, to) = day_bounds(start, end, bangkok());

        assert_eq!(from.to_rfc3339(), "2025-08-31T17:00:00+00:00");
        assert_eq!(to.to_rfc3339(), "2025-09-03T16:59:59.999+00:00");
    }

    #[test]
    fn test_group_by_day_uses_local_dates() {
        // ---
        let readings = vec![
            reading(1, "2025-09-13T23:30:00+07:00", 10.0),
            reading(2, "2025-09-14T00:30:00+07:00", 20.0),
            reading(3, "2025-09-14T12:00:00+07:00", 25.05),
        ];
        let days = group_by_day(&readings, bangkok());

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 9, 13).unwrap());
        assert_eq!(days[0].level, 10.0);
        assert_eq!(days[1].date, NaiveDate::from_ymd_opt(2025, 9, 14).unwrap());
        assert_eq!(days[1].readings, 2);
        assert_eq!(days[1].level, 22.5);
    }

    #[test]
    fn test_daily_series_keeps_past_week() {
        // ---
        let readings = vec![
            reading(3, "2025-09-14T09:00:00+07:00", 12.0),
            reading(2, "2025-09-10T09:00:00+07:00", 8.0),
            reading(1, "2025-08-30T09:00:00+07:00", 50.0),
        ];
        let now = DateTime::parse_from_rfc3339("2025-09-14T10:00:00+07:00").unwrap();
        let series = daily_series(&readings, now);

        assert_eq!(series.window_days, 7);
        let levels: Vec<f64> = series.days.iter().map(|d| d.level).collect();
        assert_eq!(levels, [8.0, 12.0]);
    }

    #[test]
    fn test_daily_series_falls_back_to_thirty_days() {
        // ---
        let readings = vec![
            reading(2, "2025-09-01T09:00:00+07:00", 30.0),
            reading(1, "2025-07-01T09:00:00+07:00", 99.0),
        ];
        let now = DateTime::parse_from_rfc3339("2025-09-14T10:00:00+07:00").unwrap();
        let series = daily_series(&readings, now);

        assert_eq!(series.window_days, 30);
        assert_eq!(series.days.len(), 1);
        assert_eq!(series.days[0].level, 30.0);

        let empty = daily_series(&[], now);
        assert_eq!(empty.window_days, 30);
        assert!(empty.days.is_empty());
    }
}
