//! Application entry point for the `floodwatch` dashboard backend.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Connect to the Postgres reading store
//! - Install the insert-notification trigger (polling still works without it)
//! - Load persisted thresholds and start the background tasks: reading sync,
//!   settings file watcher, weather poller
//! - Mount the API routes via the `routes` gateway (EMBP) and serve until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `FLOODWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `FLOODWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining variables.
use std::{env, io::IsTerminal, sync::Arc, time::Duration};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod analysis;
mod config;
mod models;
mod routes;
mod schema;
mod settings;
mod store;
mod sync;
mod weather;

pub use config::Config;

use settings::SettingsStore;
use store::PgReadingStore;
use sync::{ReadingSync, SyncOptions};
use weather::{WeatherClient, WeatherMonitor};

/// How often the settings file is checked for edits made by other processes.
const SETTINGS_WATCH_PERIOD: Duration = Duration::from_secs(5);

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to database: {}",
        config::mask_db_url(&cfg.db_url)
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database '{}': {}",
                config::mask_db_url(&cfg.db_url),
                e
            )
        })?;

    tracing::info!("Successfully connected to database");

    if let Err(e) = schema::install_notify_trigger(&pool).await {
        tracing::warn!("Insert notifications unavailable, polling only: {:#}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let settings = Arc::new(SettingsStore::load(cfg.settings_path.clone()).await);
    let store = Arc::new(PgReadingStore::new(pool.clone()));
    let sync = Arc::new(ReadingSync::new(
        store.clone(),
        SyncOptions::from_config(&cfg),
        settings.subscribe(),
        shutdown_rx.clone(),
    ));
    let weather = Arc::new(WeatherMonitor::new(WeatherClient::from_config(&cfg)?));

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(sync.clone().run()));
    tasks.push(tokio::spawn({
        let settings = settings.clone();
        let shutdown = shutdown_rx.clone();
        async move { settings.watch_file(SETTINGS_WATCH_PERIOD, shutdown).await }
    }));
    if !weather.is_configured() {
        tracing::warn!("OPENWEATHER_API_KEY not set, polling the warning feed only");
    }
    tasks.push(tokio::spawn({
        let weather = weather.clone();
        let period = cfg.weather_poll_interval;
        let shutdown = shutdown_rx.clone();
        async move { weather.run(period, shutdown).await }
    }));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(routes::AppState {
        sync,
        settings,
        weather,
        votes: store,
    });

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
    pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C and tell the background tasks to stop.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("Shutdown requested");
    shutdown_tx.send_replace(true);
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `FLOODWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `FLOODWATCH_LOG_LEVEL`
fn init_tracing() {
    // ---
    let span_events = match env::var("FLOODWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("FLOODWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
