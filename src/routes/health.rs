// src/routes/health.rs
//! Liveness endpoint.
//!
//! Exports a subrouter with `GET /health` to the gateway. Reports process
//! liveness plus whether the sync component still considers the store
//! reachable; it never queries the store itself.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    table_exists: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        table_exists: state.sync.table_exists(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
