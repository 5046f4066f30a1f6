//! Recording sinks
//!
//! Append-only persistence for trigger events and time-series samples.
//! Every implementation is insert-or-ignore on `(timestamp, metric,
//! channel)`: writing the same key twice is a silent no-op.

mod memory;
mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::error::SinkError;
use crate::models::{SampleRow, TriggerEvent};
use async_trait::async_trait;

/// Destination for recorded rows
#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn append_trigger_event(&self, event: &TriggerEvent) -> Result<(), SinkError>;

    async fn append_sample(&self, row: &SampleRow) -> Result<(), SinkError>;

    /// Append one reading's samples. Both bundled sinks write all rows or
    /// none; this fallback stops at the first failure.
    async fn append_samples(&self, rows: &[SampleRow]) -> Result<(), SinkError> {
        for row in rows {
            self.append_sample(row).await?;
        }
        Ok(())
    }
}

/// Primary key shared by both tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RowKey {
    pub timestamp: String,
    pub metric: String,
    pub channel: String,
}

impl RowKey {
    pub fn of_event(event: &TriggerEvent) -> Self {
        Self {
            timestamp: event.timestamp.clone(),
            metric: event.metric.clone(),
            channel: event.channel.clone(),
        }
    }

    pub fn of_sample(row: &SampleRow) -> Self {
        Self {
            timestamp: row.timestamp.clone(),
            metric: row.metric.clone(),
            channel: row.channel.clone(),
        }
    }
}
