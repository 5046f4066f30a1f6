//! High/low threshold recording
//!
//! Each configured channel carries a [`TriggerState`]. A reading is
//! classified per channel and a trigger event is persisted only when the
//! classification differs from the stored state; steady readings cause no
//! I/O at all.

use super::{
    idle_while_missing, log_read_failure, take_reading, ErrorTracker, ReadOutcome, WorkerContext,
};
use crate::alert::AlertDeduplicator;
use crate::config::{ThresholdMetric, ThresholdWindow};
use crate::models::{Reading, TriggerEvent, TriggerState};
use crate::shutdown::Shutdown;
use crate::source::MetricSource;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Classify `value` against `window`; boundary values are never Normal
pub fn classify(value: f64, window: &ThresholdWindow) -> TriggerState {
    if value <= window.low {
        TriggerState::Low
    } else if value >= window.high {
        TriggerState::High
    } else {
        TriggerState::Normal
    }
}

/// What a single cycle found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Classified,
    Failed,
    Missing,
}

/// Threshold state machine for one metric
pub struct ThresholdMonitor {
    config: ThresholdMetric,
    source: Arc<dyn MetricSource>,
    ctx: WorkerContext,
    alerts: Option<AlertDeduplicator>,
    states: Vec<TriggerState>,
    errors: ErrorTracker,
}

impl ThresholdMonitor {
    pub fn new(config: ThresholdMetric, source: Arc<dyn MetricSource>, ctx: WorkerContext) -> Self {
        let states = vec![TriggerState::Starting; config.windows.len()];
        Self {
            config,
            source,
            ctx,
            alerts: None,
            states,
            errors: ErrorTracker::default(),
        }
    }

    pub fn with_alerts(mut self, alerts: AlertDeduplicator) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_error_tracker(mut self, errors: ErrorTracker) -> Self {
        self.errors = errors;
        self
    }

    /// Current state of `channel`
    pub fn state(&self, channel: &str) -> Option<TriggerState> {
        self.config
            .windows
            .iter()
            .position(|w| w.channel == channel)
            .map(|i| self.states[i])
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        info!(
            metric = %self.config.metric,
            channels = self.config.windows.len(),
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "Starting threshold monitor"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }
            if self.cycle().await == Cycle::Missing {
                idle_while_missing(&mut shutdown).await;
                break;
            }
            if !shutdown.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!(metric = %self.config.metric, "Threshold monitor stopped");
        Ok(())
    }

    /// Take and process one reading
    pub async fn cycle(&mut self) -> Cycle {
        let outcome = take_reading(
            self.source.as_ref(),
            &self.config.metric,
            self.ctx.clock.as_ref(),
        )
        .await;

        match outcome {
            ReadOutcome::Reading(reading) => {
                self.errors.reset();
                self.process(&reading).await;
                Cycle::Classified
            }
            ReadOutcome::Missing => {
                self.mark_missing();
                Cycle::Missing
            }
            ReadOutcome::Failed(e) => {
                log_read_failure(&self.ctx, &self.config.metric, &e);
                if self.errors.record_error(Instant::now()) {
                    self.enter_error(&e.to_string());
                }
                Cycle::Failed
            }
        }
    }

    /// Classify each channel present in `reading` and persist changes
    pub async fn process(&mut self, reading: &Reading) {
        for index in 0..self.config.windows.len() {
            let Some(value) = reading.channel(index) else {
                continue;
            };
            let window = &self.config.windows[index];
            let state = classify(value, window);
            let previous = self.states[index];

            if state != previous {
                let event = TriggerEvent {
                    timestamp: reading.timestamp.clone(),
                    metric: self.config.metric.clone(),
                    channel: window.channel.clone(),
                    value,
                    state,
                };
                self.persist(&event).await;
                // Updated even if the write failed, so a broken sink does
                // not cause a write on every cycle
                self.states[index] = state;
                self.ctx.metrics.inc_trigger_events(&self.config.metric, state);
                self.ctx.logger.log_transition(
                    &self.config.metric,
                    &window.channel,
                    previous,
                    state,
                    value,
                );
            }

            if let Some(alerts) = self.alerts.as_mut() {
                alerts.notify(&window.channel, value, state, &reading.timestamp);
            }
        }
    }

    async fn persist(&self, event: &TriggerEvent) {
        let start = Instant::now();
        let result = self.ctx.sink.append_trigger_event(event).await;
        self.ctx
            .metrics
            .observe_sink_latency(start.elapsed().as_secs_f64());

        if let Err(e) = result {
            self.ctx.metrics.inc_sink_errors();
            warn!(
                metric = %event.metric,
                channel = %event.channel,
                state = %event.state,
                error = %e,
                "Failed to record trigger event"
            );
        }
    }

    fn mark_missing(&mut self) {
        if self.states.iter().all(|s| *s == TriggerState::SensorMissing) {
            return;
        }
        self.states.fill(TriggerState::SensorMissing);
        self.ctx.logger.log_sensor_missing(&self.config.metric);
    }

    fn enter_error(&mut self, last_error: &str) {
        self.states.fill(TriggerState::Error);
        warn!(
            metric = %self.config.metric,
            consecutive_errors = self.errors.count(),
            error = %last_error,
            "Metric source keeps failing, channels marked as error"
        );
    }
}
