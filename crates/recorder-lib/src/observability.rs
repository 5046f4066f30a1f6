//! Observability infrastructure for the recorder
//!
//! Provides:
//! - Prometheus metrics (trigger events, recorded samples, alert outcomes,
//!   worker restarts, sink latency) held in a per-instance registry
//! - Structured logging of recording events with tracing

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::TriggerState;
use crate::supervisor::WorkerState;

/// Histogram buckets for sink write latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

const NAMESPACE: &str = "sensor_recorder";

struct RecorderMetricsInner {
    registry: Registry,
    trigger_events: IntCounterVec,
    samples_recorded: IntCounterVec,
    alerts: IntCounterVec,
    worker_restarts: IntCounterVec,
    workers_by_state: IntGaugeVec,
    source_errors: IntCounterVec,
    sink_errors: IntCounter,
    sink_write_latency_seconds: Histogram,
}

/// Recorder metrics for Prometheus exposition
///
/// Cheap to clone; clones share one registry. Each instance owns its own
/// registry so several engines (or tests) never collide.
#[derive(Clone)]
pub struct RecorderMetrics {
    inner: Arc<RecorderMetricsInner>,
}

impl RecorderMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let trigger_events = IntCounterVec::new(
            Opts::new(
                "trigger_events_total",
                "Threshold state transitions persisted",
            ),
            &["metric", "state"],
        )?;
        let samples_recorded = IntCounterVec::new(
            Opts::new(
                "samples_recorded_total",
                "Time-series rows persisted by variance and interval recorders",
            ),
            &["metric", "mode"],
        )?;
        let alerts = IntCounterVec::new(
            Opts::new("alerts_total", "Alert requests by outcome"),
            &["outcome"],
        )?;
        let worker_restarts = IntCounterVec::new(
            Opts::new("worker_restarts_total", "Worker relaunches by supervisor"),
            &["worker"],
        )?;
        let workers_by_state = IntGaugeVec::new(
            Opts::new("workers", "Supervised workers by state"),
            &["state"],
        )?;
        let source_errors = IntCounterVec::new(
            Opts::new("source_errors_total", "Failed metric source reads"),
            &["metric"],
        )?;
        let sink_errors = IntCounter::new("sink_errors_total", "Failed recording sink writes")?;
        let sink_write_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sink_write_latency_seconds",
                "Time spent writing rows to the recording sink",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(trigger_events.clone()))?;
        registry.register(Box::new(samples_recorded.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(worker_restarts.clone()))?;
        registry.register(Box::new(workers_by_state.clone()))?;
        registry.register(Box::new(source_errors.clone()))?;
        registry.register(Box::new(sink_errors.clone()))?;
        registry.register(Box::new(sink_write_latency_seconds.clone()))?;

        Ok(Self {
            inner: Arc::new(RecorderMetricsInner {
                registry,
                trigger_events,
                samples_recorded,
                alerts,
                worker_restarts,
                workers_by_state,
                source_errors,
                sink_errors,
                sink_write_latency_seconds,
            }),
        })
    }

    pub fn inc_trigger_events(&self, metric: &str, state: TriggerState) {
        self.inner
            .trigger_events
            .with_label_values(&[metric, state.label()])
            .inc();
    }

    pub fn add_samples_recorded(&self, metric: &str, mode: &str, rows: u64) {
        self.inner
            .samples_recorded
            .with_label_values(&[metric, mode])
            .inc_by(rows);
    }

    pub fn inc_alerts(&self, outcome: &str) {
        self.inner.alerts.with_label_values(&[outcome]).inc();
    }

    pub fn inc_worker_restarts(&self, worker: &str) {
        self.inner.worker_restarts.with_label_values(&[worker]).inc();
    }

    pub fn inc_source_errors(&self, metric: &str) {
        self.inner.source_errors.with_label_values(&[metric]).inc();
    }

    pub fn inc_sink_errors(&self) {
        self.inner.sink_errors.inc();
    }

    pub fn observe_sink_latency(&self, duration_secs: f64) {
        self.inner.sink_write_latency_seconds.observe(duration_secs);
    }

    /// Replace the per-state worker gauges with a fresh tally
    pub fn set_workers_by_state(&self, counts: &HashMap<WorkerState, i64>) {
        for state in WorkerState::ALL {
            let count = counts.get(&state).copied().unwrap_or(0);
            self.inner
                .workers_by_state
                .with_label_values(&[state.as_str()])
                .set(count);
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for recording events
///
/// Provides consistent, event-tagged records for transitions, recorded
/// variance pairs and worker lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log a persisted threshold transition
    pub fn log_transition(
        &self,
        metric: &str,
        channel: &str,
        from: TriggerState,
        to: TriggerState,
        value: f64,
    ) {
        match to {
            TriggerState::Low | TriggerState::High => {
                warn!(
                    event = "trigger_transition",
                    node = %self.node_name,
                    metric = %metric,
                    channel = %channel,
                    from = %from,
                    to = %to,
                    value = value,
                    "Reading left its normal range"
                );
            }
            _ => {
                info!(
                    event = "trigger_transition",
                    node = %self.node_name,
                    metric = %metric,
                    channel = %channel,
                    from = %from,
                    to = %to,
                    value = value,
                    "Trigger state changed"
                );
            }
        }
    }

    /// Log a variance pair that was persisted
    pub fn log_variance_recorded(&self, metric: &str, channels: usize, largest_delta: f64) {
        info!(
            event = "variance_recorded",
            node = %self.node_name,
            metric = %metric,
            channels = channels,
            largest_delta = largest_delta,
            "Recorded readings on variance"
        );
    }

    /// Log a metric whose sensor is not present
    pub fn log_sensor_missing(&self, metric: &str) {
        warn!(
            event = "sensor_missing",
            node = %self.node_name,
            metric = %metric,
            "Sensor missing, recording idle for this metric"
        );
    }

    /// Log supervisor state for a worker
    pub fn log_worker_state(&self, worker: &str, state: WorkerState, restarts: u32) {
        match state {
            WorkerState::Error => {
                warn!(
                    event = "worker_state",
                    node = %self.node_name,
                    worker = %worker,
                    state = %state,
                    restarts = restarts,
                    "Worker is in error state"
                );
            }
            _ => {
                info!(
                    event = "worker_state",
                    node = %self.node_name,
                    worker = %worker,
                    state = %state,
                    restarts = restarts,
                    "Worker state"
                );
            }
        }
    }

    /// Log recorder startup
    pub fn log_startup(&self, version: &str, workers: usize) {
        info!(
            event = "recorder_started",
            node = %self.node_name,
            recorder_version = %version,
            workers = workers,
            "Sensor recorder started"
        );
    }

    /// Log recorder shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "recorder_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Sensor recorder shutting down"
        );
    }
}
