//! Alert queue and dispatcher
//!
//! Workers push into a bounded queue with `try_send` and never wait on
//! delivery. One dispatcher task drains the queue into the configured
//! [`AlertSink`]; failed deliveries are logged and dropped.

use super::{AlertRequest, AlertSink};
use crate::error::AlertError;
use crate::observability::RecorderMetrics;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Create a bounded alert queue
pub fn alert_channel(
    capacity: usize,
    metrics: Option<RecorderMetrics>,
) -> (AlertQueue, mpsc::Receiver<AlertRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AlertQueue { tx, metrics }, rx)
}

/// Producer side of the alert queue
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<AlertRequest>,
    metrics: Option<RecorderMetrics>,
}

impl AlertQueue {
    /// Queue `alert` without waiting. Returns false if it was dropped.
    pub fn try_enqueue(&self, alert: AlertRequest) -> bool {
        let outcome = match self.tx.try_send(alert) {
            Ok(()) => "queued",
            Err(TrySendError::Full(alert)) => {
                warn!(
                    metric = %alert.metric,
                    channel = %alert.channel,
                    state = %alert.state,
                    "Alert queue full, dropping alert"
                );
                "dropped"
            }
            Err(TrySendError::Closed(alert)) => {
                warn!(
                    metric = %alert.metric,
                    channel = %alert.channel,
                    "Alert dispatcher not running, dropping alert"
                );
                "dropped"
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_alerts(outcome);
        }
        outcome == "queued"
    }
}

/// How long a stopping dispatcher waits for another queued alert
pub const SHUTDOWN_DRAIN_IDLE: Duration = Duration::from_secs(1);

/// Drains the alert queue into an [`AlertSink`]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    metrics: Option<RecorderMetrics>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RecorderMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until shutdown or until every queue handle is gone
    pub async fn run(self, mut rx: mpsc::Receiver<AlertRequest>, mut shutdown: Shutdown) {
        info!("Starting alert dispatcher");

        loop {
            tokio::select! {
                alert = rx.recv() => {
                    match alert {
                        Some(alert) => self.deliver(&alert).await,
                        None => {
                            debug!("Alert queue closed");
                            break;
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Shutting down alert dispatcher");
                    self.drain(&mut rx).await;
                    break;
                }
            }
        }
    }

    /// Deliver what is still queued, plus anything stopping workers add,
    /// until the queue closes or stays empty for [`SHUTDOWN_DRAIN_IDLE`]
    async fn drain(&self, rx: &mut mpsc::Receiver<AlertRequest>) {
        let mut drained = 0usize;
        while let Ok(Some(alert)) = tokio::time::timeout(SHUTDOWN_DRAIN_IDLE, rx.recv()).await {
            self.deliver(&alert).await;
            drained += 1;
        }
        if drained > 0 {
            info!(alerts = drained, "Delivered queued alerts before shutdown");
        }
    }

    async fn deliver(&self, alert: &AlertRequest) {
        let outcome = match self.sink.send(alert).await {
            Ok(()) => "sent",
            Err(e) => {
                warn!(
                    metric = %alert.metric,
                    channel = %alert.channel,
                    state = %alert.state,
                    error = %e,
                    "Alert delivery failed"
                );
                "failed"
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_alerts(outcome);
        }
    }
}

/// Sink that writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink {
    node_name: String,
}

impl LogAlertSink {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &AlertRequest) -> Result<(), AlertError> {
        warn!(
            event = "sensor_alert",
            node = %self.node_name,
            metric = %alert.metric,
            channel = %alert.channel,
            value = alert.value,
            state = %alert.state,
            timestamp = %alert.timestamp,
            "Sensor threshold alert"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerState;
    use crate::shutdown;
    use std::sync::Mutex;

    /// Fails the first delivery, records the rest
    #[derive(Default)]
    struct FlakySink {
        calls: Mutex<usize>,
        delivered: Mutex<Vec<AlertRequest>>,
    }

    #[async_trait]
    impl AlertSink for FlakySink {
        async fn send(&self, alert: &AlertRequest) -> Result<(), AlertError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                return Err(AlertError::Status(503));
            }
            self.delivered.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn request(channel: &str) -> AlertRequest {
        AlertRequest {
            metric: "gas".to_string(),
            channel: channel.to_string(),
            value: 12.0,
            state: TriggerState::High,
            previous_state: TriggerState::Normal,
            timestamp: "2024-01-01 00:00:00.000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = RecorderMetrics::new().unwrap();
        let (queue, _rx) = alert_channel(1, Some(metrics.clone()));

        assert!(queue.try_enqueue(request("a")));
        assert!(!queue.try_enqueue(request("b")));

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("sensor_recorder_alerts_total{outcome=\"dropped\"} 1"));
    }

    #[tokio::test]
    async fn test_dispatcher_continues_after_failure() {
        let sink = Arc::new(FlakySink::default());
        let metrics = RecorderMetrics::new().unwrap();
        let (queue, rx) = alert_channel(8, None);
        let (_trigger, shutdown) = shutdown::channel();

        queue.try_enqueue(request("a"));
        queue.try_enqueue(request("b"));
        queue.try_enqueue(request("c"));
        drop(queue);

        AlertDispatcher::new(sink.clone())
            .with_metrics(metrics.clone())
            .run(rx, shutdown)
            .await;

        let delivered = sink.delivered.lock().unwrap();
        let channels: Vec<_> = delivered.iter().map(|a| a.channel.as_str()).collect();
        assert_eq!(channels, vec!["b", "c"]);

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("sensor_recorder_alerts_total{outcome=\"failed\"} 1"));
        assert!(text.contains("sensor_recorder_alerts_total{outcome=\"sent\"} 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_alerts_delivered_on_shutdown() {
        let sink = Arc::new(FlakySink::default());
        let (queue, rx) = alert_channel(8, None);
        let (trigger, shutdown) = shutdown::channel();

        queue.try_enqueue(request("a"));
        queue.try_enqueue(request("b"));
        queue.try_enqueue(request("c"));
        trigger.trigger();

        // The queue handle stays alive, so only the idle grace ends the drain
        AlertDispatcher::new(sink.clone()).run(rx, shutdown).await;

        let delivered = sink.delivered.lock().unwrap();
        let channels: Vec<_> = delivered.iter().map(|a| a.channel.as_str()).collect();
        assert_eq!(channels, vec!["b", "c"]);
        assert_eq!(*sink.calls.lock().unwrap(), 3);
        drop(queue);
    }

    #[tokio::test]
    async fn test_log_sink_accepts_alerts() {
        let sink = LogAlertSink::new("node-1");
        assert!(sink.send(&request("a")).await.is_ok());
    }
}
