//! Route gateway (EMBP): each sibling module exports a subrouter, merged here.

use std::sync::Arc;

use axum::Router;

use crate::settings::SettingsStore;
use crate::store::VoteStore;
use crate::sync::ReadingSync;
use crate::weather::WeatherMonitor;

mod error;
mod health;
mod settings;
mod water;
mod weather;

pub use error::ApiError;

/// Shared handles every handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<ReadingSync>,
    pub settings: Arc<SettingsStore>,
    pub weather: Arc<WeatherMonitor>,
    pub votes: Arc<dyn VoteStore>,
}

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(water::router())
        .merge(settings::router())
        .merge(weather::router())
        .merge(health::router())
        .with_state(state)
}
