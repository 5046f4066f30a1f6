//! Alerting for high/low triggers
//!
//! Handles:
//! - Throttling repeated alerts per (metric, channel) with a resend interval
//! - Queueing deduplicated alerts without blocking the recording worker
//! - Delivering queued alerts from one background dispatcher task
//! - Formatting alerts for an Alertmanager webhook

mod alertmanager;
mod dedup;
mod dispatch;

pub use alertmanager::{AlertSeverity, AlertmanagerAlert, AlertmanagerPayload, AlertmanagerSink};
pub use dedup::{AlertDeduplicator, AlertRecord};
pub use dispatch::{alert_channel, AlertDispatcher, AlertQueue, LogAlertSink};

use crate::error::AlertError;
use crate::models::TriggerState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default capacity of the alert queue
pub const DEFAULT_ALERT_QUEUE_SIZE: usize = 256;

/// One alert handed to an [`AlertSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub metric: String,
    pub channel: String,
    pub value: f64,
    pub state: TriggerState,
    /// State carried by the last alert sent for this channel
    pub previous_state: TriggerState,
    /// Timestamp of the reading that raised the alert
    pub timestamp: String,
}

/// Delivery end of the alert pipeline
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &AlertRequest) -> Result<(), AlertError>;
}
