// src/routes/water.rs
//! Water-level endpoints backed by the sync component.
//!
//! - `GET  /api/water`                 : full dashboard snapshot
//! - `GET  /api/water/rate`            : two-point rate of change
//! - `POST /api/water/test-connection` : manual connectivity probe
//! - `GET  /api/water/history`         : readings between two calendar dates
//! - `GET  /api/water/weekly`          : per-day means for the trend chart

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::models::{DailySeries, RateOfChange};
use crate::sync::{HistoryReport, WaterSnapshot};

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Serialize)]
struct ConnectionResponse {
    connected: bool,
}

async fn snapshot(State(state): State<AppState>) -> Json<WaterSnapshot> {
    Json(state.sync.snapshot(Utc::now()).await)
}

async fn rate(State(state): State<AppState>) -> Json<RateOfChange> {
    Json(state.sync.rate(Utc::now()).await)
}

async fn test_connection(State(state): State<AppState>) -> Json<ConnectionResponse> {
    Json(ConnectionResponse {
        connected: state.sync.probe().await,
    })
}

fn parse_date(name: &str, value: Option<&str>) -> Result<NaiveDate, ApiError> {
    // ---
    let value = value.ok_or_else(|| ApiError::BadRequest(format!("Missing '{name}' date")))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!("Invalid '{name}' date '{value}', expected YYYY-MM-DD"))
    })
}

/// Handle `GET /api/water/history?start=YYYY-MM-DD&end=YYYY-MM-DD`.
///
/// Both bounds are local calendar days and inclusive.
async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryReport>, ApiError> {
    // ---
    let start = parse_date("start", q.start.as_deref())?;
    let end = parse_date("end", q.end.as_deref())?;
    if start > end {
        return Err(ApiError::BadRequest(
            "'start' must not be after 'end'".to_string(),
        ));
    }

    let report = state.sync.history(start, end).await?;
    tracing::debug!(
        "History {}..={} returned {} readings",
        start,
        end,
        report.readings.len()
    );
    Ok(Json(report))
}

async fn weekly(State(state): State<AppState>) -> Result<Json<DailySeries>, ApiError> {
    Ok(Json(state.sync.weekly(Utc::now()).await?))
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/water", get(snapshot))
        .route("/api/water/rate", get(rate))
        .route("/api/water/test-connection", post(test_connection))
        .route("/api/water/history", get(history))
        .route("/api/water/weekly", get(weekly))
}
