//! Core data models for the recording engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used for every persisted row (UTC, millisecond precision)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// What a metric source hands back for one read
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// One value per channel, in configured channel order
    Values(Vec<f64>),
    /// The hardware behind the metric is not present
    Missing,
}

impl Sample {
    pub fn scalar(value: f64) -> Self {
        Sample::Values(vec![value])
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Sample::Missing)
    }
}

/// A sample stamped with the time it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub metric: String,
    pub values: Vec<f64>,
    pub timestamp: String,
}

impl Reading {
    pub fn at(metric: impl Into<String>, values: Vec<f64>, timestamp: String) -> Self {
        Self {
            metric: metric.into(),
            values,
            timestamp,
        }
    }

    /// Value of a channel, if the source reported that many channels
    pub fn channel(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }
}

/// State of one (metric, channel) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Starting,
    Normal,
    Low,
    High,
    SensorMissing,
    Error,
}

impl TriggerState {
    /// Low and High are the states alerts are raised for
    pub fn is_alertable(&self) -> bool {
        matches!(self, TriggerState::Low | TriggerState::High)
    }

    /// States that come from classifying a value and get persisted
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            TriggerState::Normal | TriggerState::Low | TriggerState::High
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerState::Starting => "Starting",
            TriggerState::Normal => "Normal",
            TriggerState::Low => "Low",
            TriggerState::High => "High",
            TriggerState::SensorMissing => "Sensor Missing",
            TriggerState::Error => "Error",
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A persisted state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub timestamp: String,
    pub metric: String,
    pub channel: String,
    pub value: f64,
    pub state: TriggerState,
}

/// A persisted time-series value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub timestamp: String,
    pub metric: String,
    pub channel: String,
    pub value: f64,
}
