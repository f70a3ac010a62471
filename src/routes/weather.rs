// src/routes/weather.rs
//! Weather endpoints.
//!
//! Forecast and warning serve the poller's cached results and answer `503`
//! with the last error when nothing good has been fetched yet. The rain vote
//! tally is computed from the store on each request.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;

use super::{ApiError, AppState};
use crate::analysis::votes::{tally_votes, vote_window_start};
use crate::models::VoteTally;
use crate::store::StoreError;
use crate::weather::{Cached, WarningBulletin, WeatherReport};

fn into_result<T>(cached: Cached<T>, what: &str) -> Result<Json<T>, ApiError> {
    // ---
    match cached.value {
        Some(value) => Ok(Json(value)),
        None => Err(ApiError::Unavailable(
            cached
                .error
                .unwrap_or_else(|| format!("{what} not available yet")),
        )),
    }
}

async fn weather(State(state): State<AppState>) -> Result<Json<WeatherReport>, ApiError> {
    into_result(state.weather.report().await, "Weather data")
}

async fn warning(State(state): State<AppState>) -> Result<Json<WarningBulletin>, ApiError> {
    into_result(state.weather.warning().await, "Weather warning")
}

/// Handle `GET /api/weather/vote`: tally of the last 30 minutes of votes.
async fn vote_tally(State(state): State<AppState>) -> Result<Json<VoteTally>, ApiError> {
    // ---
    let now = Utc::now();
    let votes = state
        .votes
        .fetch_votes_since(vote_window_start(now))
        .await
        .map_err(|e| match e {
            StoreError::MissingTable => {
                ApiError::NotFound("weather_votes table does not exist".to_string())
            }
            e => ApiError::Database(e),
        })?;

    Ok(Json(tally_votes(&votes, now)))
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/weather", get(weather))
        .route("/api/weather/warning", get(warning))
        .route("/api/weather/vote", get(vote_tally))
}
