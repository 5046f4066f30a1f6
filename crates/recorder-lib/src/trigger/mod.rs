//! Recording workers
//!
//! Three per-metric loops decide which readings reach the sink:
//! - [`ThresholdMonitor`]: persists a trigger event when a channel moves
//!   between Normal, Low and High
//! - [`VarianceMonitor`]: persists consecutive reading pairs that differ
//!   by more than a per-channel variance
//! - [`IntervalRecorder`]: persists every reading on a fixed cadence
//!
//! All three share [`WorkerContext`] and the missing/transient-error
//! handling defined here.

mod interval;
mod threshold;
mod variance;

#[cfg(test)]
mod tests;

pub use interval::IntervalRecorder;
pub use threshold::{classify, Cycle, ThresholdMonitor};
pub use variance::{exceeds_variance, pair_rows, VarianceMonitor};

use crate::clock::{Clock, SystemClock};
use crate::error::SourceError;
use crate::models::{Reading, Sample, SampleRow};
use crate::observability::{RecorderMetrics, StructuredLogger};
use crate::shutdown::Shutdown;
use crate::sink::RecordingSink;
use crate::source::{ensure_finite, MetricSource};
use crate::supervisor::effective_restart_count;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll period while a metric's sensor is missing
pub const MISSING_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failed reads that put a threshold metric in Error
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Quiet period after which the failed-read streak starts over
pub const DEFAULT_ERROR_WINDOW: Duration = Duration::from_secs(60);

/// Collaborators shared by every recording worker
#[derive(Clone)]
pub struct WorkerContext {
    pub sink: Arc<dyn RecordingSink>,
    pub metrics: RecorderMetrics,
    pub logger: StructuredLogger,
    pub clock: Arc<dyn Clock>,
}

impl WorkerContext {
    pub fn new(
        sink: Arc<dyn RecordingSink>,
        metrics: RecorderMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            sink,
            metrics,
            logger,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Write sample rows, timing the write. Failures are logged and counted.
    async fn write_samples(&self, metric: &str, mode: &str, rows: &[SampleRow]) -> bool {
        if rows.is_empty() {
            return true;
        }
        let start = Instant::now();
        let result = self.sink.append_samples(rows).await;
        self.metrics
            .observe_sink_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics
                    .add_samples_recorded(metric, mode, rows.len() as u64);
                true
            }
            Err(e) => {
                self.metrics.inc_sink_errors();
                warn!(metric = %metric, mode = %mode, error = %e, "Failed to record samples");
                false
            }
        }
    }
}

/// Outcome of one source read
pub(crate) enum ReadOutcome {
    Reading(Reading),
    Missing,
    Failed(SourceError),
}

/// Read the source and stamp the result
pub(crate) async fn take_reading(
    source: &dyn MetricSource,
    metric: &str,
    clock: &dyn Clock,
) -> ReadOutcome {
    match source.read().await.and_then(ensure_finite) {
        Ok(Sample::Values(values)) => {
            ReadOutcome::Reading(Reading::at(metric, values, clock.timestamp()))
        }
        Ok(Sample::Missing) => ReadOutcome::Missing,
        Err(e) => ReadOutcome::Failed(e),
    }
}

/// Log a transient read failure and count it
pub(crate) fn log_read_failure(ctx: &WorkerContext, metric: &str, error: &SourceError) {
    ctx.metrics.inc_source_errors(metric);
    debug!(metric = %metric, error = %error, "Failed to read metric source, skipping cycle");
}

/// Idle until shutdown once a sensor has been found missing
pub(crate) async fn idle_while_missing(shutdown: &mut Shutdown) {
    while shutdown.sleep(MISSING_POLL_INTERVAL).await {}
}

/// Streak of failed reads; forgotten after a quiet window
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    count: u32,
    last_error: Option<Instant>,
    max_consecutive: u32,
    window: Duration,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_ERROR_WINDOW)
    }
}

impl ErrorTracker {
    pub fn new(max_consecutive: u32, window: Duration) -> Self {
        Self {
            count: 0,
            last_error: None,
            max_consecutive: max_consecutive.max(1),
            window,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Register a failure at `now`. True exactly when the streak reaches
    /// the limit.
    pub fn record_error(&mut self, now: Instant) -> bool {
        self.count = effective_restart_count(now, self.last_error, self.count, self.window) + 1;
        self.last_error = Some(now);
        self.count == self.max_consecutive
    }

    pub fn is_sustained(&self) -> bool {
        self.count >= self.max_consecutive
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_error = None;
    }
}
