//! Alert deduplication
//!
//! One deduplicator per metric worker, holding an [`AlertRecord`] per
//! channel. A classification is forwarded when it differs from the last
//! one sent, or when a Low/High state has been held for at least the
//! resend interval since the last send.

use super::{AlertQueue, AlertRequest};
use crate::config::{AlertPolicy, SeverityPolicy};
use crate::models::TriggerState;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

/// Last alert sent for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertRecord {
    pub last_sent_state: TriggerState,
    pub last_sent_at: Option<Instant>,
}

impl Default for AlertRecord {
    fn default() -> Self {
        Self {
            last_sent_state: TriggerState::Normal,
            last_sent_at: None,
        }
    }
}

pub struct AlertDeduplicator {
    metric: String,
    policy: AlertPolicy,
    records: HashMap<String, AlertRecord>,
    queue: AlertQueue,
}

impl AlertDeduplicator {
    pub fn new(metric: impl Into<String>, policy: AlertPolicy, queue: AlertQueue) -> Self {
        Self {
            metric: metric.into(),
            policy,
            records: HashMap::new(),
            queue,
        }
    }

    pub fn record(&self, channel: &str) -> Option<AlertRecord> {
        self.records.get(channel).copied()
    }

    fn severity(&self, state: TriggerState) -> Option<SeverityPolicy> {
        match state {
            TriggerState::High => Some(self.policy.high),
            TriggerState::Low => Some(self.policy.low),
            _ => None,
        }
    }

    /// Decide whether `state` on `channel` should be forwarded at `now`,
    /// updating the channel's record when it is.
    pub fn evaluate(&mut self, channel: &str, state: TriggerState, now: Instant) -> bool {
        if !state.is_classified() {
            return false;
        }

        let record = self.records.get(channel).copied().unwrap_or_default();

        if state == TriggerState::Normal {
            if record.last_sent_state == TriggerState::Normal {
                return false;
            }
            let send_on_normal = self
                .severity(record.last_sent_state)
                .map(|s| s.send_on_normal)
                .unwrap_or(false);
            self.records.insert(
                channel.to_string(),
                AlertRecord {
                    last_sent_state: TriggerState::Normal,
                    last_sent_at: if send_on_normal {
                        Some(now)
                    } else {
                        record.last_sent_at
                    },
                },
            );
            return send_on_normal;
        }

        match self.severity(state) {
            Some(severity) if severity.enabled => {}
            _ => return false,
        }

        let changed = state != record.last_sent_state;
        let resend_due = match (self.policy.resend_interval, record.last_sent_at) {
            (Some(interval), Some(at)) => now.saturating_duration_since(at) >= interval,
            _ => false,
        };

        if changed || resend_due {
            self.records.insert(
                channel.to_string(),
                AlertRecord {
                    last_sent_state: state,
                    last_sent_at: Some(now),
                },
            );
            true
        } else {
            false
        }
    }

    /// Evaluate a classification and queue an alert if it passes
    pub fn notify(&mut self, channel: &str, value: f64, state: TriggerState, timestamp: &str) {
        let previous_state = self.record(channel).unwrap_or_default().last_sent_state;
        if !self.evaluate(channel, state, Instant::now()) {
            return;
        }
        debug!(
            metric = %self.metric,
            channel = %channel,
            state = %state,
            "Queueing alert"
        );
        self.queue.try_enqueue(AlertRequest {
            metric: self.metric.clone(),
            channel: channel.to_string(),
            value,
            state,
            previous_state,
            timestamp: timestamp.to_string(),
        });
    }
}
