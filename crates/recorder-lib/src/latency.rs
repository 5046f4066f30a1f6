//! Poll interval tuning from measured source latency
//!
//! A source is read a few times; the slowest read times a multiplier
//! becomes the recommended interval. Sources that never produced a value
//! get a fixed fallback. Unless the caller asks for the lowest possible
//! interval, the recommendation never undercuts the configured floor.

use crate::config::RecordingPlan;
use crate::models::Sample;
use crate::source::{MetricSource, SourceRegistry};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Reads taken per measurement
pub const DEFAULT_LATENCY_SAMPLES: usize = 6;

/// Multiplier applied to the slowest read
pub const DEFAULT_LATENCY_MULTIPLIER: f64 = 10.0;

/// Interval used when no latency could be measured
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

/// Time the slowest successful read out of `samples` reads.
///
/// `None` when the source failed or reported missing every time.
pub async fn measure_latency(source: &dyn MetricSource, samples: usize) -> Option<Duration> {
    let mut slowest: Option<Duration> = None;

    for _ in 0..samples.max(1) {
        let start = Instant::now();
        let result = source.read().await;
        let elapsed = start.elapsed();

        match result {
            Ok(Sample::Values(_)) => {
                slowest = Some(slowest.map_or(elapsed, |s| s.max(elapsed)));
            }
            Ok(Sample::Missing) => {}
            Err(e) => debug!(error = %e, "Latency probe read failed"),
        }
    }

    slowest
}

/// Recommended poll interval for a measured latency
pub fn recommend_interval(
    latency: Option<Duration>,
    multiplier: f64,
    floor: Duration,
    set_lowest: bool,
) -> Duration {
    // Non-finite, negative or overflowing products fall back as well
    let measured = latency
        .filter(|l| !l.is_zero())
        .and_then(|l| Duration::try_from_secs_f64(l.as_secs_f64() * multiplier).ok())
        .filter(|l| !l.is_zero())
        .unwrap_or(FALLBACK_INTERVAL);

    if set_lowest {
        measured
    } else {
        measured.max(floor)
    }
}

/// How a plan's intervals are re-derived from measured latency
#[derive(Debug, Clone, Copy)]
pub struct IntervalTuning {
    pub samples: usize,
    pub multiplier: f64,
    /// Ignore the configured intervals as floors
    pub set_lowest: bool,
}

impl Default for IntervalTuning {
    fn default() -> Self {
        Self {
            samples: DEFAULT_LATENCY_SAMPLES,
            multiplier: DEFAULT_LATENCY_MULTIPLIER,
            set_lowest: false,
        }
    }
}

/// Re-derive the poll and wait intervals of every threshold and variance
/// metric in `plan`. Interval recording keeps its fixed cadence. Metrics
/// without a registered source are left alone.
pub async fn tune_plan(plan: &mut RecordingPlan, sources: &SourceRegistry, tuning: IntervalTuning) {
    for metric in &mut plan.thresholds {
        let Some(source) = sources.get(&metric.metric) else {
            continue;
        };
        let latency = measure_latency(source.as_ref(), tuning.samples).await;
        let interval = recommend_interval(
            latency,
            tuning.multiplier,
            metric.poll_interval,
            tuning.set_lowest,
        );
        info!(
            metric = %metric.metric,
            latency_ms = latency.map(|l| l.as_millis() as u64),
            interval_secs = interval.as_secs_f64(),
            "Tuned threshold poll interval"
        );
        metric.poll_interval = interval;
    }

    for metric in &mut plan.variances {
        let Some(source) = sources.get(&metric.metric) else {
            continue;
        };
        let latency = measure_latency(source.as_ref(), tuning.samples).await;
        let interval = recommend_interval(
            latency,
            tuning.multiplier,
            metric.wait_interval,
            tuning.set_lowest,
        );
        info!(
            metric = %metric.metric,
            latency_ms = latency.map(|l| l.as_millis() as u64),
            interval_secs = interval.as_secs_f64(),
            "Tuned variance wait interval"
        );
        metric.wait_interval = interval;
    }
}
