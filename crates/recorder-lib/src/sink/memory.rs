//! In-memory sink for tests and dry runs

use super::{RecordingSink, RowKey};
use crate::error::SinkError;
use crate::models::{SampleRow, TriggerEvent};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    events: Vec<TriggerEvent>,
    event_keys: HashSet<RowKey>,
    samples: Vec<SampleRow>,
    sample_keys: HashSet<RowKey>,
}

/// Keeps rows in insertion order
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn trigger_events(&self) -> Vec<TriggerEvent> {
        self.tables
            .lock()
            .map(|t| t.events.clone())
            .unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<SampleRow> {
        self.tables
            .lock()
            .map(|t| t.samples.clone())
            .unwrap_or_default()
    }

    fn check_writable(&self) -> Result<(), SinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Task("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordingSink for MemorySink {
    async fn append_trigger_event(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().map_err(|_| SinkError::Poisoned)?;
        if tables.event_keys.insert(RowKey::of_event(event)) {
            tables.events.push(event.clone());
        }
        Ok(())
    }

    async fn append_sample(&self, row: &SampleRow) -> Result<(), SinkError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().map_err(|_| SinkError::Poisoned)?;
        if tables.sample_keys.insert(RowKey::of_sample(row)) {
            tables.samples.push(row.clone());
        }
        Ok(())
    }

    async fn append_samples(&self, rows: &[SampleRow]) -> Result<(), SinkError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().map_err(|_| SinkError::Poisoned)?;
        for row in rows {
            if tables.sample_keys.insert(RowKey::of_sample(row)) {
                tables.samples.push(row.clone());
            }
        }
        Ok(())
    }
}
