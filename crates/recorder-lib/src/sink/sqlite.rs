//! SQLite recording sink
//!
//! One connection behind a mutex; every statement runs on the blocking
//! pool so a slow disk never stalls the async workers.

use super::RecordingSink;
use crate::error::SinkError;
use crate::models::{SampleRow, TriggerEvent, TriggerState};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trigger_events (
    timestamp TEXT NOT NULL,
    metric    TEXT NOT NULL,
    channel   TEXT NOT NULL,
    value     REAL NOT NULL,
    state     TEXT NOT NULL,
    PRIMARY KEY (timestamp, metric, channel)
);
CREATE TABLE IF NOT EXISTS samples (
    timestamp TEXT NOT NULL,
    metric    TEXT NOT NULL,
    channel   TEXT NOT NULL,
    value     REAL NOT NULL,
    PRIMARY KEY (timestamp, metric, channel)
);
";

/// Sink writing to a local SQLite database
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened recording database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, SinkError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SinkError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SinkError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| SinkError::Task(e.to_string()))?
    }

    /// All trigger events for `metric`, oldest first
    pub async fn trigger_events(&self, metric: &str) -> Result<Vec<TriggerEvent>, SinkError> {
        let metric = metric.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, metric, channel, value, state FROM trigger_events
                 WHERE metric = ?1 ORDER BY timestamp, channel",
            )?;
            let rows = stmt.query_map(params![metric], |row| {
                let state: String = row.get(4)?;
                Ok(TriggerEvent {
                    timestamp: row.get(0)?,
                    metric: row.get(1)?,
                    channel: row.get(2)?,
                    value: row.get(3)?,
                    state: parse_state(&state),
                })
            })?;
            let events = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
    }

    /// All samples for `metric`, oldest first
    pub async fn samples(&self, metric: &str) -> Result<Vec<SampleRow>, SinkError> {
        let metric = metric.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, metric, channel, value FROM samples
                 WHERE metric = ?1 ORDER BY timestamp, channel",
            )?;
            let rows = stmt.query_map(params![metric], |row| {
                Ok(SampleRow {
                    timestamp: row.get(0)?,
                    metric: row.get(1)?,
                    channel: row.get(2)?,
                    value: row.get(3)?,
                })
            })?;
            let samples = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(samples)
        })
        .await
    }
}

fn parse_state(label: &str) -> TriggerState {
    match label {
        "Normal" => TriggerState::Normal,
        "Low" => TriggerState::Low,
        "High" => TriggerState::High,
        "Sensor Missing" => TriggerState::SensorMissing,
        "Starting" => TriggerState::Starting,
        _ => TriggerState::Error,
    }
}

#[async_trait]
impl RecordingSink for SqliteSink {
    async fn append_trigger_event(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO trigger_events (timestamp, metric, channel, value, state)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.timestamp,
                    event.metric,
                    event.channel,
                    event.value,
                    event.state.label()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_sample(&self, row: &SampleRow) -> Result<(), SinkError> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO samples (timestamp, metric, channel, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![row.timestamp, row.metric, row.channel, row.value],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_samples(&self, rows: &[SampleRow]) -> Result<(), SinkError> {
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            // One reading's channels land together or not at all
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO samples (timestamp, metric, channel, value)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for row in &rows {
                    stmt.execute(params![row.timestamp, row.metric, row.channel, row.value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
