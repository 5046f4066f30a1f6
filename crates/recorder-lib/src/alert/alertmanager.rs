//! Alertmanager webhook delivery

use super::{AlertRequest, AlertSink};
use crate::error::AlertError;
use crate::models::{TriggerState, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const ALERT_NAME: &str = "SensorThreshold";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
}

impl AlertSeverity {
    pub fn for_state(state: TriggerState) -> Self {
        if state.is_alertable() {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert status (firing or resolved)
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Alertmanager webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Posts alerts to an Alertmanager-compatible webhook
pub struct AlertmanagerSink {
    client: reqwest::Client,
    url: String,
    node_name: String,
}

impl AlertmanagerSink {
    pub fn new(url: impl Into<String>, node_name: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            node_name: node_name.into(),
        })
    }

    /// Build the Alertmanager alerts for one request.
    ///
    /// Alertmanager matches alerts on their full label set, so a resolve
    /// carries the labels of the firing alert it closes. A direct Low/High
    /// flip resolves the old alert and fires the new one.
    pub fn build_alerts(&self, alert: &AlertRequest) -> Vec<AlertmanagerAlert> {
        let at = to_rfc3339(&alert.timestamp);
        let mut alerts = Vec::with_capacity(2);

        if alert.previous_state.is_alertable() && alert.previous_state != alert.state {
            alerts.push(self.alert_for(alert, alert.previous_state, &at, true));
        }
        if alert.state.is_alertable() {
            alerts.push(self.alert_for(alert, alert.state, &at, false));
        }
        alerts
    }

    fn alert_for(
        &self,
        alert: &AlertRequest,
        labelled: TriggerState,
        at: &str,
        resolved: bool,
    ) -> AlertmanagerAlert {
        let severity = AlertSeverity::for_state(labelled);

        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), ALERT_NAME.to_string());
        labels.insert("metric".to_string(), alert.metric.clone());
        labels.insert("channel".to_string(), alert.channel.clone());
        labels.insert("state".to_string(), labelled.label().to_string());
        labels.insert("node".to_string(), self.node_name.clone());
        labels.insert("severity".to_string(), severity.to_string());

        let mut annotations = HashMap::new();
        annotations.insert(
            "summary".to_string(),
            format!(
                "{} {} is {} on {}",
                alert.metric, alert.channel, alert.state, self.node_name
            ),
        );
        annotations.insert("value".to_string(), alert.value.to_string());
        annotations.insert("reading_timestamp".to_string(), alert.timestamp.clone());

        AlertmanagerAlert {
            status: if resolved { "resolved" } else { "firing" }.to_string(),
            labels,
            annotations,
            starts_at: at.to_string(),
            ends_at: resolved.then(|| at.to_string()),
            generator_url: None,
        }
    }
}

/// Convert a stored row timestamp to RFC3339, falling back to now
fn to_rfc3339(timestamp: &str) -> String {
    match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
        Ok(naive) => naive.and_utc().to_rfc3339(),
        Err(_) => Utc::now().to_rfc3339(),
    }
}

#[async_trait]
impl AlertSink for AlertmanagerSink {
    async fn send(&self, alert: &AlertRequest) -> Result<(), AlertError> {
        let alerts = self.build_alerts(alert);
        if alerts.is_empty() {
            return Ok(());
        }
        let payload = AlertmanagerPayload { alerts };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }

        debug!(
            metric = %alert.metric,
            channel = %alert.channel,
            state = %alert.state,
            "Alert delivered to Alertmanager"
        );
        Ok(())
    }
}
