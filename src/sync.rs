//! Reading ingestion and view-model sync.
//!
//! Keeps an in-memory window of the most recent readings fresh by combining
//! three update sources:
//! - a fixed-period poll of the store,
//! - insert notifications from the store (each one triggers a full refetch,
//!   never an incremental append, so the window and its order stay exact),
//! - threshold-settings changes (recompute only, no fetch).
//!
//! Store failures never escape this module; they become the `connected` and
//! `table_exists` flags. A missing table disables the component for the rest
//! of the process, any other failure keeps the last good readings and is
//! retried on the next tick.
//!
//! Every fetch takes a sequence number when it starts. A result that lands
//! after a newer one has already been applied is dropped, and nothing is
//! applied once shutdown has been signalled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::daily::{
    daily_analytics, daily_series, day_bounds, group_by_day, level_status, summarize,
    SERIES_FALLBACK_DAYS,
};
use crate::analysis::newest_first;
use crate::analysis::rate::rate_of_change;
use crate::analysis::staleness::{describe_age, stale_warning, StaleWarning};
use crate::analysis::trend::estimate_trend;
use crate::models::{
    DailyLevel, DailySeries, LevelStatus, RateOfChange, Reading, TrendState, WarningLevels,
    WaterAnalytics,
};
use crate::store::{ChangeEvent, ReadingStore, StoreError};
use crate::Config;

/// Tunables for [`ReadingSync`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub sensor_id: Option<String>,
    pub limit: u32,
    pub poll_interval: Duration,
    pub probe_interval: Duration,
    pub stale_after_minutes: i64,
    pub utc_offset: FixedOffset,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        // ---
        Self {
            sensor_id: config.sensor_id.clone(),
            limit: config.readings_limit,
            poll_interval: config.poll_interval,
            probe_interval: config.probe_interval,
            stale_after_minutes: config.stale_after_minutes,
            utc_offset: config.utc_offset,
        }
    }
}

#[derive(Debug, Default)]
struct WaterState {
    readings: Vec<Reading>,
    connected: bool,
    last_update: Option<DateTime<Utc>>,
    trend: TrendState,
    analytics: WaterAnalytics,
    applied_seq: u64,
}

/// Everything the dashboard renders for the water-level panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterSnapshot {
    /// Most recent first, as returned by the store.
    pub readings: Vec<Reading>,
    pub current_level: Option<f64>,
    pub status: Option<LevelStatus>,
    #[serde(flatten)]
    pub trend: TrendState,
    pub time_to_warning_text: String,
    pub instant_rate: RateOfChange,
    pub analytics: WaterAnalytics,
    pub warning_levels: WarningLevels,
    pub connected: bool,
    pub table_exists: bool,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_update_age: Option<String>,
    pub latest_reading_time: Option<DateTime<Utc>>,
    pub stale_warning: Option<StaleWarning>,
}

/// Readings and analytics for a calendar date range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Oldest first.
    pub readings: Vec<Reading>,
    pub analytics: WaterAnalytics,
    pub daily: Vec<DailyLevel>,
}

pub struct ReadingSync {
    store: Arc<dyn ReadingStore>,
    options: SyncOptions,
    levels: watch::Receiver<WarningLevels>,
    shutdown: watch::Receiver<bool>,
    state: RwLock<WaterState>,
    table_exists: AtomicBool,
    next_seq: AtomicU64,
}

impl ReadingSync {
    // ---
    pub fn new(
        store: Arc<dyn ReadingStore>,
        options: SyncOptions,
        levels: watch::Receiver<WarningLevels>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        // ---
        Self {
            store,
            options,
            levels,
            shutdown,
            state: RwLock::new(WaterState::default()),
            table_exists: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn table_exists(&self) -> bool {
        self.table_exists.load(Ordering::SeqCst)
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn disable(&self) {
        // ---
        if self.table_exists.swap(false, Ordering::SeqCst) {
            info!("water_readings table not found, water level feature disabled");
        }
    }

    /// Fetch the latest window and recompute derived state.
    ///
    /// Returns `true` when the result was applied.
    pub async fn refresh(&self) -> bool {
        // ---
        if !self.table_exists() {
            self.state.write().await.connected = false;
            return false;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .store
            .fetch_latest(self.options.sensor_id.as_deref(), self.options.limit)
            .await;

        if self.is_shut_down() {
            debug!("Discarding fetch #{} completed after shutdown", seq);
            return false;
        }

        let mut state = self.state.write().await;
        if matches!(result, Err(StoreError::MissingTable)) {
            // Disables regardless of arrival order.
            self.disable();
            state.connected = false;
            return false;
        }
        if seq < state.applied_seq {
            debug!(
                "Discarding fetch #{}; #{} already applied",
                seq, state.applied_seq
            );
            return false;
        }

        match result {
            Ok(readings) => {
                state.applied_seq = seq;
                state.connected = true;
                state.last_update = Some(Utc::now());
                debug!("Fetch #{} returned {} readings", seq, readings.len());

                if !readings.is_empty() {
                    state.readings = readings;
                    self.recompute_locked(&mut state);
                }
                true
            }
            Err(e) => {
                warn!("Error fetching water data: {}", e);
                state.connected = false;
                false
            }
        }
    }

    /// Minimal connectivity check. Updates `connected` as a side effect.
    pub async fn probe(&self) -> bool {
        // ---
        if !self.table_exists() {
            self.state.write().await.connected = false;
            return false;
        }

        let result = self.store.probe().await;
        if self.is_shut_down() {
            return false;
        }

        let connected = match result {
            Ok(()) => true,
            Err(StoreError::MissingTable) => {
                self.disable();
                false
            }
            Err(e) => {
                warn!("Connection test failed: {}", e);
                false
            }
        };
        self.state.write().await.connected = connected;
        connected
    }

    /// Recompute trend and analytics from the readings already held.
    pub async fn recompute(&self) {
        // ---
        let mut state = self.state.write().await;
        self.recompute_locked(&mut state);
    }

    fn recompute_locked(&self, state: &mut WaterState) {
        // ---
        let levels = *self.levels.borrow();
        let now = Utc::now().with_timezone(&self.options.utc_offset);

        state.trend = estimate_trend(&state.readings, levels.warning_level);
        state.analytics = daily_analytics(&state.readings, now);
        debug!(
            "Trend {:?} at {:.3}/h, time to warning: {}",
            state.trend.trend, state.trend.rate_per_hour, state.trend.time_to_warning
        );
    }

    /// Two-point instant rate over the held readings.
    pub async fn rate(&self, now: DateTime<Utc>) -> RateOfChange {
        rate_of_change(&self.state.read().await.readings, now)
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> WaterSnapshot {
        // ---
        let levels = *self.levels.borrow();
        let state = self.state.read().await;

        let latest = newest_first(&state.readings).first().map(|r| (*r).clone());
        let current_level = latest.as_ref().map(|r| r.level);

        WaterSnapshot {
            readings: state.readings.clone(),
            current_level,
            status: current_level.map(|level| level_status(level, &levels)),
            trend: state.trend,
            time_to_warning_text: state.trend.time_to_warning.to_string(),
            instant_rate: rate_of_change(&state.readings, now),
            analytics: state.analytics,
            warning_levels: levels,
            connected: state.connected,
            table_exists: self.table_exists(),
            last_update_time: state.last_update,
            last_update_age: state.last_update.map(|t| describe_age(t, now)),
            latest_reading_time: latest.as_ref().map(|r| r.timestamp),
            stale_warning: latest.and_then(|r| {
                stale_warning(r.timestamp, now, self.options.stale_after_minutes)
            }),
        }
    }

    async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        if !self.table_exists() {
            return Err(StoreError::MissingTable);
        }

        let result = self
            .store
            .fetch_range(self.options.sensor_id.as_deref(), start, end)
            .await;
        if matches!(result, Err(StoreError::MissingTable)) {
            self.disable();
        }
        result
    }

    /// Readings between two local calendar dates, inclusive.
    pub async fn history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HistoryReport, StoreError> {
        // ---
        let (from, to) = day_bounds(start, end, self.options.utc_offset);
        let readings = self.fetch_range(from, to).await?;

        Ok(HistoryReport {
            start: from,
            end: to,
            analytics: summarize(&readings),
            daily: group_by_day(&readings, self.options.utc_offset),
            readings,
        })
    }

    /// Per-day means over the past week, widening to 30 days when the week is empty.
    pub async fn weekly(&self, now: DateTime<Utc>) -> Result<DailySeries, StoreError> {
        // ---
        let start = now - chrono::Duration::days(SERIES_FALLBACK_DAYS);
        let readings = self.fetch_range(start, now).await?;
        Ok(daily_series(
            &readings,
            now.with_timezone(&self.options.utc_offset),
        ))
    }

    async fn subscribe(&self) -> Option<mpsc::Receiver<ChangeEvent>> {
        // ---
        match self.store.subscribe_inserts().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("Realtime subscription unavailable, polling only: {}", e);
                None
            }
        }
    }

    /// Drive the component until shutdown is signalled.
    ///
    /// Fetches once immediately, subscribes to inserts, then polls on a fixed
    /// period. A failed or closed subscription is retried on each poll tick.
    /// Leaving the loop drops the change-feed receiver, which ends the
    /// subscription.
    pub async fn run(self: Arc<Self>) {
        // ---
        let mut shutdown = self.shutdown.clone();
        let mut levels = self.levels.clone();
        let mut levels_open = true;

        self.refresh().await;

        let mut changes = if self.table_exists() {
            self.subscribe().await
        } else {
            None
        };

        let mut poll = interval_at(
            Instant::now() + self.options.poll_interval,
            self.options.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe = interval_at(
            Instant::now() + self.options.probe_interval,
            self.options.probe_interval,
        );
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Reading sync started (poll every {:?}, realtime: {})",
            self.options.poll_interval,
            changes.is_some()
        );

        loop {
            if self.is_shut_down() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = poll.tick() => {
                    if self.table_exists() {
                        self.refresh().await;
                    }
                    if changes.is_none() && self.table_exists() {
                        changes = self.subscribe().await;
                    }
                }
                _ = probe.tick() => {
                    if self.table_exists() {
                        self.probe().await;
                    }
                }
                event = next_change(&mut changes) => match event {
                    Some(event) => {
                        debug!("New water reading notified: {:?}", event.id);
                        self.refresh().await;
                    }
                    None => {
                        warn!("Realtime subscription closed, reopening on the next poll");
                        changes = None;
                    }
                },
                changed = levels.changed(), if levels_open => {
                    if changed.is_ok() {
                        debug!("Thresholds changed, recomputing derived state");
                        self.recompute().await;
                    } else {
                        levels_open = false;
                    }
                }
            }
        }

        drop(changes);
        info!("Reading sync stopped");
    }
}

/// Next change event, or pending forever when there is no subscription.
async fn next_change(changes: &mut Option<mpsc::Receiver<ChangeEvent>>) -> Option<ChangeEvent> {
    // ---
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    use crate::models::{TimeToWarning, Trend};
    use crate::store::ChangeKind;

    /// In-memory store that replays queued responses and counts calls.
    #[derive(Default)]
    struct FakeStore {
        responses: Mutex<VecDeque<Result<Vec<Reading>, StoreError>>>,
        probe_result: Mutex<Option<StoreError>>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        change_tx: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
        subscribe_failures: AtomicUsize,
        subscribe_calls: AtomicUsize,
        latest_calls: AtomicUsize,
        probe_calls: AtomicUsize,
        range_calls: AtomicUsize,
    }

    impl FakeStore {
        fn push(&self, response: Result<Vec<Reading>, StoreError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn latest_calls(&self) -> usize {
            self.latest_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReadingStore for FakeStore {
        async fn fetch_latest(
            &self,
            _sensor_id: Option<&str>,
            _limit: u32,
        ) -> Result<Vec<Reading>, StoreError> {
            // ---
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()));
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            response
        }

        async fn fetch_range(
            &self,
            _sensor_id: Option<&str>,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Reading>, StoreError> {
            // ---
            self.range_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                reading_at(1, start + ChronoDuration::hours(1), 10.0),
                reading_at(2, start + ChronoDuration::hours(2), 30.0),
            ])
        }

        async fn probe(&self) -> Result<(), StoreError> {
            // ---
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            match self.probe_result.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<ChangeEvent>, StoreError> {
            // ---
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.subscribe_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.subscribe_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(transient());
            }
            let (tx, rx) = mpsc::channel(8);
            *self.change_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    fn transient() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }

    fn reading_at(id: i64, timestamp: DateTime<Utc>, level: f64) -> Reading {
        // ---
        Reading {
            id,
            timestamp,
            level,
            temperature: None,
            sensor_id: "raspberry_pi_1".to_string(),
        }
    }

    /// Ten readings six minutes apart, rising 5/h to `last_level`, ending now. Newest first.
    fn rising_window(last_level: f64) -> Vec<Reading> {
        // ---
        let now = Utc::now();
        (0..10)
            .map(|i| {
                reading_at(
                    100 - i,
                    now - ChronoDuration::minutes(6 * i),
                    last_level - 0.5 * i as f64,
                )
            })
            .collect()
    }

    struct Harness {
        store: Arc<FakeStore>,
        sync: Arc<ReadingSync>,
        levels_tx: watch::Sender<WarningLevels>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        // ---
        let store = Arc::new(FakeStore::default());
        let (levels_tx, levels_rx) = watch::channel(WarningLevels::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let options = SyncOptions {
            sensor_id: None,
            limit: 100,
            poll_interval: Duration::from_secs(10),
            probe_interval: Duration::from_secs(120),
            stale_after_minutes: 7,
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
        };
        let sync = Arc::new(ReadingSync::new(
            store.clone(),
            options,
            levels_rx,
            shutdown_rx,
        ));

        Harness {
            store,
            sync,
            levels_tx,
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_refresh_applies_readings_and_derived_state() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));

        assert!(h.sync.refresh().await);

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(snapshot.connected);
        assert!(snapshot.last_update_time.is_some());
        assert_eq!(snapshot.readings.len(), 10);
        assert_eq!(snapshot.current_level, Some(10.0));
        assert_eq!(snapshot.status, Some(LevelStatus::Normal));
        assert_eq!(snapshot.trend.trend, Trend::Rising);
        assert_eq!(snapshot.trend.time_to_warning.hours, Some(2));
        assert_eq!(snapshot.time_to_warning_text, "2 hours");
        assert_eq!(snapshot.stale_warning, None);
    }

    #[tokio::test]
    async fn test_missing_table_disables_for_the_session() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));
        h.store.push(Err(StoreError::MissingTable));

        assert!(h.sync.refresh().await);
        assert!(!h.sync.refresh().await);
        assert!(!h.sync.table_exists());
        assert_eq!(h.store.latest_calls(), 2);

        // Later polls and probes never reach the store.
        for _ in 0..3 {
            assert!(!h.sync.refresh().await);
        }
        assert!(!h.sync.probe().await);
        assert_eq!(h.store.latest_calls(), 2);
        assert_eq!(h.store.probe_calls.load(Ordering::SeqCst), 0);

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(!snapshot.connected);
        assert!(!snapshot.table_exists);
        assert_eq!(snapshot.readings.len(), 10, "held readings must survive");
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_last_good_readings() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));
        h.store.push(Err(transient()));
        h.store.push(Ok(rising_window(12.0)));

        h.sync.refresh().await;
        assert!(!h.sync.refresh().await);

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(!snapshot.connected);
        assert!(snapshot.table_exists);
        assert_eq!(snapshot.current_level, Some(10.0));

        // Retried on the next tick.
        assert!(h.sync.refresh().await);
        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(snapshot.connected);
        assert_eq!(snapshot.current_level, Some(12.0));
    }

    #[tokio::test]
    async fn test_empty_result_keeps_readings_but_marks_connected() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));
        h.store.push(Err(transient()));
        h.store.push(Ok(Vec::new()));

        h.sync.refresh().await;
        h.sync.refresh().await;
        h.sync.refresh().await;

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(snapshot.connected);
        assert_eq!(snapshot.readings.len(), 10);
    }

    #[tokio::test]
    async fn test_older_response_landing_late_is_discarded() {
        // ---
        let h = harness();
        let (release, gate) = oneshot::channel();
        *h.store.gate.lock().unwrap() = Some(gate);
        h.store.push(Ok(rising_window(10.0)));
        h.store.push(Ok(rising_window(15.0)));

        let slow = tokio::spawn({
            let sync = h.sync.clone();
            async move { sync.refresh().await }
        });
        while h.store.latest_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(h.sync.refresh().await, "newer fetch applies");
        release.send(()).unwrap();
        assert!(!slow.await.unwrap(), "older fetch is dropped");

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert_eq!(snapshot.current_level, Some(15.0));
    }

    #[tokio::test]
    async fn test_result_after_shutdown_is_not_applied() {
        // ---
        let h = harness();
        let (release, gate) = oneshot::channel();
        *h.store.gate.lock().unwrap() = Some(gate);
        h.store.push(Ok(rising_window(10.0)));

        let in_flight = tokio::spawn({
            let sync = h.sync.clone();
            async move { sync.refresh().await }
        });
        while h.store.latest_calls() == 0 {
            tokio::task::yield_now().await;
        }

        h.shutdown_tx.send(true).unwrap();
        release.send(()).unwrap();
        assert!(!in_flight.await.unwrap());

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert!(snapshot.readings.is_empty());
        assert!(!snapshot.connected);
    }

    #[tokio::test]
    async fn test_late_missing_table_still_disables() {
        // ---
        let h = harness();
        let (release, gate) = oneshot::channel();
        *h.store.gate.lock().unwrap() = Some(gate);
        h.store.push(Err(StoreError::MissingTable));
        h.store.push(Ok(rising_window(10.0)));

        let slow = tokio::spawn({
            let sync = h.sync.clone();
            async move { sync.refresh().await }
        });
        while h.store.latest_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(h.sync.refresh().await, "newer fetch applies");
        release.send(()).unwrap();
        assert!(!slow.await.unwrap());

        assert!(!h.sync.table_exists(), "missing table disables even when late");
        assert!(!h.sync.refresh().await);
        assert_eq!(h.store.latest_calls(), 2);
    }

    #[tokio::test]
    async fn test_probe_updates_connected_flag() {
        // ---
        let h = harness();
        assert!(h.sync.probe().await);
        assert!(h.sync.snapshot(Utc::now()).await.connected);

        *h.store.probe_result.lock().unwrap() = Some(transient());
        assert!(!h.sync.probe().await);
        assert!(!h.sync.snapshot(Utc::now()).await.connected);
        assert!(h.sync.table_exists());

        *h.store.probe_result.lock().unwrap() = Some(StoreError::MissingTable);
        assert!(!h.sync.probe().await);
        assert!(!h.sync.table_exists());
    }

    #[tokio::test]
    async fn test_threshold_change_recomputes_without_fetch() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));
        h.sync.refresh().await;

        h.levels_tx.send_replace(WarningLevels {
            warning_level: 30.0,
            ..WarningLevels::default()
        });
        h.sync.recompute().await;

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert_eq!(snapshot.trend.time_to_warning.hours, Some(4));
        assert_eq!(h.store.latest_calls(), 1);

        // Already above the new warning level: no countdown.
        h.levels_tx.send_replace(WarningLevels {
            warning_level: 5.0,
            ..WarningLevels::default()
        });
        h.sync.recompute().await;
        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert_eq!(snapshot.trend.time_to_warning, TimeToWarning::STABLE);
        assert_eq!(snapshot.status, Some(LevelStatus::Warning));
    }

    #[tokio::test]
    async fn test_stale_latest_reading_is_flagged() {
        // ---
        let h = harness();
        let old = Utc::now() - ChronoDuration::minutes(30);
        h.store.push(Ok(vec![reading_at(1, old, 10.0)]));
        h.sync.refresh().await;

        let warning = h
            .sync
            .snapshot(Utc::now())
            .await
            .stale_warning
            .expect("30-minute-old reading should be stale");
        assert!(warning.minutes_since_reading >= 30);
    }

    #[tokio::test]
    async fn test_history_uses_whole_range() {
        // ---
        let h = harness();
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 9, 3).unwrap();

        let report = assert_ok!(h.sync.history(start, end).await);
        assert_eq!(report.readings.len(), 2);
        assert_eq!(report.analytics.daily_average, 20.0);
        assert_eq!(report.analytics.peak_level, 30.0);
        assert_eq!(report.start.to_rfc3339(), "2025-08-31T17:00:00+00:00");
        assert_eq!(report.daily.len(), 1);
        assert_eq!(report.daily[0].level, 20.0);

        h.store.push(Err(StoreError::MissingTable));
        h.sync.refresh().await;
        let err = assert_err!(h.sync.history(start, end).await);
        assert!(err.is_missing_table());
        assert_eq!(h.store.range_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_weekly_series_groups_recent_readings() {
        // ---
        let h = harness();
        let now = Utc::now();

        let series = assert_ok!(h.sync.weekly(now).await);
        assert_eq!(h.store.range_calls.load(Ordering::SeqCst), 1);
        // Both fake readings sit 30 days back, outside the past week.
        assert_eq!(series.window_days, 30);
        let readings: usize = series.days.iter().map(|d| d.readings).sum();
        assert_eq!(readings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_polling_after_missing_table() {
        // ---
        let h = harness();
        h.store.push(Err(StoreError::MissingTable));

        let task = tokio::spawn(h.sync.clone().run());
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(h.store.latest_calls(), 1, "no re-query after disable");
        assert!(h.store.change_tx.lock().unwrap().is_none(), "no subscription");
        assert!(!h.sync.snapshot(Utc::now()).await.connected);

        h.shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_and_refetches_on_insert() {
        // ---
        let h = harness();
        let task = tokio::spawn(h.sync.clone().run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.latest_calls(), 1, "fetch on activation");

        let tx = h
            .store
            .change_tx
            .lock()
            .unwrap()
            .clone()
            .expect("run should subscribe to inserts");
        tx.send(ChangeEvent {
            kind: ChangeKind::Insert,
            table: "water_readings".to_string(),
            id: Some(7),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.latest_calls(), 2, "insert triggers a full refetch");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.store.latest_calls(), 3, "poll tick");

        h.shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(tx.is_closed(), "shutdown unsubscribes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_failed_or_closed_subscription() {
        // ---
        let h = harness();
        h.store.subscribe_failures.store(1, Ordering::SeqCst);
        let task = tokio::spawn(h.sync.clone().run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.subscribe_calls.load(Ordering::SeqCst), 1);
        assert!(h.store.change_tx.lock().unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            h.store.subscribe_calls.load(Ordering::SeqCst),
            2,
            "resubscribe on the next poll tick"
        );
        let tx = h
            .store
            .change_tx
            .lock()
            .unwrap()
            .clone()
            .expect("second attempt succeeds");
        let polls = h.store.latest_calls();
        tx.send(ChangeEvent {
            kind: ChangeKind::Insert,
            table: "water_readings".to_string(),
            id: Some(8),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.latest_calls(), polls + 1, "insert refetch after resubscribe");

        // Feed closes underneath the loop.
        drop(tx);
        drop(h.store.change_tx.lock().unwrap().take());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.store.subscribe_calls.load(Ordering::SeqCst), 3);
        assert!(h.store.change_tx.lock().unwrap().is_some(), "closed feed reopened");

        h.shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recomputes_on_threshold_change() {
        // ---
        let h = harness();
        h.store.push(Ok(rising_window(10.0)));
        let task = tokio::spawn(h.sync.clone().run());
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.levels_tx.send_replace(WarningLevels {
            warning_level: 30.0,
            ..WarningLevels::default()
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = h.sync.snapshot(Utc::now()).await;
        assert_eq!(snapshot.trend.time_to_warning.hours, Some(4));
        assert_eq!(h.store.latest_calls(), 1);

        h.shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
