// src/routes/settings.rs
//! Threshold settings: `GET /api/settings` and `PUT /api/settings`.
//!
//! A successful `PUT` persists the thresholds and broadcasts them, so the
//! next `/api/water` snapshot already reflects the new levels.

use axum::{extract::State, routing::get, Json, Router};

use super::{ApiError, AppState};
use crate::models::WarningLevels;
use crate::settings::SettingsUpdate;

async fn get_settings(State(state): State<AppState>) -> Json<WarningLevels> {
    Json(state.settings.current())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<WarningLevels>, ApiError> {
    // ---
    let levels = state.settings.update(update).await?;
    Ok(Json(levels))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/settings", get(get_settings).put(put_settings))
}
