//! Access to the remote reading store.
//!
//! The store is the hosted Postgres behind the dashboard. Sync code only sees
//! the [`ReadingStore`] trait, so tests can substitute an in-memory fake.
//! Insert notifications arrive over `LISTEN/NOTIFY` (see `schema.rs` for the
//! trigger) and are forwarded on an `mpsc` channel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::{Postgres, QueryBuilder};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{RawReading, Reading, WeatherVote};
use crate::schema::NOTIFY_CHANNEL;

/// Postgres SQLSTATE for "undefined_table".
const UNDEFINED_TABLE: &str = "42P01";

const READING_COLUMNS: &str = r#"
    SELECT id::int8                 AS id,
           "timestamp"::timestamptz AS "timestamp",
           level::float8            AS level,
           temperature::float8      AS temperature,
           sensor_id::text          AS sensor_id
      FROM water_readings
"#;

// ---

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The `water_readings` table does not exist. Not retryable.
    #[error("water_readings table does not exist")]
    MissingTable,

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_missing_table(&self) -> bool {
        matches!(self, StoreError::MissingTable)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // ---
        if let sqlx::Error::Database(db) = &err {
            let message = db.message();
            if db.code().as_deref() == Some(UNDEFINED_TABLE)
                || (message.contains("relation") && message.contains("does not exist"))
            {
                return StoreError::MissingTable;
            }
        }
        StoreError::Database(err)
    }
}

/// Kind of row change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification from the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "op")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub id: Option<i64>,
}

/// The operations the sync component needs from the store.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    /// Most recent `limit` readings, newest first.
    async fn fetch_latest(
        &self,
        sensor_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Readings with `start <= timestamp <= end`, oldest first.
    async fn fetch_range(
        &self,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Minimal one-row query used as a connectivity check.
    async fn probe(&self) -> Result<(), StoreError>;

    /// Subscribe to insert notifications. Dropping the receiver unsubscribes.
    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<ChangeEvent>, StoreError>;
}

/// Community rain votes, stored alongside the readings.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Votes cast at or after `since`.
    async fn fetch_votes_since(&self, since: DateTime<Utc>) -> Result<Vec<WeatherVote>, StoreError>;
}

/// Drop rows that fail validation, logging how many were skipped.
fn validate_rows(rows: Vec<RawReading>) -> Vec<Reading> {
    // ---
    let total = rows.len();
    let readings: Vec<Reading> = rows.into_iter().filter_map(RawReading::validate).collect();
    if readings.len() < total {
        debug!(
            "Skipped {} malformed water_readings rows",
            total - readings.len()
        );
    }
    readings
}

// ---

/// [`ReadingStore`] backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    // ---
    async fn fetch_latest(
        &self,
        sensor_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        let mut query = QueryBuilder::<Postgres>::new(READING_COLUMNS);
        if let Some(sensor_id) = sensor_id {
            query.push(" WHERE sensor_id = ").push_bind(sensor_id);
        }
        query
            .push(r#" ORDER BY "timestamp" DESC LIMIT "#)
            .push_bind(i64::from(limit));

        let rows: Vec<RawReading> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(validate_rows(rows))
    }

    async fn fetch_range(
        &self,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        let mut query = QueryBuilder::<Postgres>::new(READING_COLUMNS);
        query
            .push(r#" WHERE "timestamp" >= "#)
            .push_bind(start)
            .push(r#" AND "timestamp" <= "#)
            .push_bind(end);
        if let Some(sensor_id) = sensor_id {
            query.push(" AND sensor_id = ").push_bind(sensor_id);
        }
        query.push(r#" ORDER BY "timestamp" ASC"#);

        let rows: Vec<RawReading> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(validate_rows(rows))
    }

    async fn probe(&self) -> Result<(), StoreError> {
        // ---
        sqlx::query("SELECT id FROM water_readings LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<ChangeEvent>, StoreError> {
        // ---
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        info!("Listening for inserts on channel '{}'", NOTIFY_CHANNEL);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = listener.recv() => match notification {
                        Ok(notification) => {
                            match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                                Ok(event) if event.kind == ChangeKind::Insert => {
                                    if tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(event) => debug!("Ignoring {:?} notification", event.kind),
                                Err(e) => warn!(
                                    "Malformed notification payload '{}': {}",
                                    notification.payload(),
                                    e
                                ),
                            }
                        }
                        Err(e) => {
                            warn!("Change feed error, retrying: {}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
            debug!("Change feed listener stopped");
        });

        Ok(rx)
    }
}

#[async_trait]
impl VoteStore for PgReadingStore {
    // ---
    async fn fetch_votes_since(&self, since: DateTime<Utc>) -> Result<Vec<WeatherVote>, StoreError> {
        // ---
        let votes = sqlx::query_as::<_, WeatherVote>(
            r#"
            SELECT is_raining,
                   created_at::timestamptz AS created_at
              FROM weather_votes
             WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        debug!("Fetched {} weather votes since {}", votes.len(), since);
        Ok(votes)
    }
}
