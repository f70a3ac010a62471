//! Persisted warning/danger thresholds.
//!
//! Thresholds live in a small JSON file (`{warningLevel, dangerLevel,
//! updateInterval}`). Missing or unparsable fields fall back to the defaults
//! field by field. Every change, whether made through the API or by another
//! process editing the file, is broadcast on a `watch` channel so the sync
//! component can recompute derived state without refetching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::WarningLevels;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid setting: {0}")]
    Invalid(&'static str),

    #[error("Failed to write settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub warning_level: Option<f64>,
    pub danger_level: Option<f64>,
    pub update_interval: Option<u32>,
}

pub struct SettingsStore {
    path: PathBuf,
    tx: watch::Sender<WarningLevels>,
}

impl SettingsStore {
    // ---
    /// Load thresholds from `path`, applying defaults when the file is absent
    /// or unreadable.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        // ---
        let path = path.into();
        let levels = read_levels(&path).await.unwrap_or_default();
        info!(
            "Thresholds: warning={} danger={} interval={}s",
            levels.warning_level, levels.danger_level, levels.update_interval
        );

        let (tx, _rx) = watch::channel(levels);
        Self { path, tx }
    }

    pub fn current(&self) -> WarningLevels {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WarningLevels> {
        self.tx.subscribe()
    }

    /// Validate, persist and broadcast an update.
    pub async fn update(&self, update: SettingsUpdate) -> Result<WarningLevels, SettingsError> {
        // ---
        let current = self.current();
        let levels = WarningLevels {
            warning_level: update.warning_level.unwrap_or(current.warning_level),
            danger_level: update.danger_level.unwrap_or(current.danger_level),
            update_interval: update.update_interval.unwrap_or(current.update_interval),
        };

        if !levels.warning_level.is_finite() || levels.warning_level <= 0.0 {
            return Err(SettingsError::Invalid("warningLevel must be a positive number"));
        }
        if !levels.danger_level.is_finite() || levels.danger_level <= 0.0 {
            return Err(SettingsError::Invalid("dangerLevel must be a positive number"));
        }
        if levels.update_interval == 0 {
            return Err(SettingsError::Invalid("updateInterval must be at least 1"));
        }
        if levels.danger_level < levels.warning_level {
            warn!(
                "dangerLevel {} is below warningLevel {}; danger is still checked first",
                levels.danger_level, levels.warning_level
            );
        }

        let body = serde_json::to_vec_pretty(&levels)?;
        tokio::fs::write(&self.path, body).await?;

        self.tx.send_replace(levels);
        info!("Thresholds updated: {:?}", levels);
        Ok(levels)
    }

    /// Re-read the file and broadcast if it changed underneath us.
    ///
    /// Returns `true` when a change was picked up.
    pub async fn reload_if_changed(&self) -> bool {
        // ---
        let Some(levels) = read_levels(&self.path).await else {
            return false;
        };

        self.tx.send_if_modified(|current| {
            if *current == levels {
                return false;
            }
            info!("Thresholds changed on disk: {:?}", levels);
            *current = levels;
            true
        })
    }

    /// Check the file every `period` until `shutdown` flips.
    pub async fn watch_file(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        // ---
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reload_if_changed().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Settings file watcher stopped");
    }
}

/// `None` when the file is absent or not JSON; individual bad fields default.
async fn read_levels(path: &Path) -> Option<WarningLevels> {
    // ---
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No settings file at {}, using defaults", path.display());
            return None;
        }
        Err(e) => {
            warn!("Could not read settings file {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&raw) {
        Ok(value) => Some(parse_levels(&value)),
        Err(e) => {
            warn!("Settings file {} is not valid JSON: {}", path.display(), e);
            None
        }
    }
}

/// Lenient field parsing: numbers or numeric strings, zero or garbage means default.
fn parse_levels(value: &Value) -> WarningLevels {
    // ---
    let defaults = WarningLevels::default();
    let number = |key: &str| -> Option<f64> {
        let n = match value.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (n.is_finite() && n != 0.0).then_some(n)
    };

    WarningLevels {
        warning_level: number("warningLevel").unwrap_or(defaults.warning_level),
        danger_level: number("dangerLevel").unwrap_or(defaults.danger_level),
        update_interval: number("updateInterval")
            .map(|n| n.trunc())
            .filter(|n| *n >= 1.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
            .unwrap_or(defaults.update_interval),
    }
}
