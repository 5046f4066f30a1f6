//! Variance recording
//!
//! Readings are compared in sliding pairs: every reading is the second
//! half of one pair and the first half of the next. When any channel
//! moved by strictly more than its variance, both readings of the pair
//! are persisted for every channel present in both.
//!
//! The second reading of a recorded pair is written again if the next
//! pair also triggers; the sink ignores the duplicate key.

use super::{idle_while_missing, log_read_failure, take_reading, ReadOutcome, WorkerContext};
use crate::config::{ChannelVariance, VarianceMetric};
use crate::models::{Reading, SampleRow};
use crate::shutdown::Shutdown;
use crate::source::MetricSource;
use std::sync::Arc;
use tracing::info;

/// True if any channel present in both readings changed by more than its variance
pub fn exceeds_variance(a: &Reading, b: &Reading, channels: &[ChannelVariance]) -> bool {
    largest_excess(a, b, channels).is_some()
}

/// Largest absolute change among channels over their variance
fn largest_excess(a: &Reading, b: &Reading, channels: &[ChannelVariance]) -> Option<f64> {
    channels
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let delta = (b.channel(i)? - a.channel(i)?).abs();
            (delta > c.variance).then_some(delta)
        })
        .reduce(f64::max)
}

/// Rows for both readings, restricted to channels present in both
pub fn pair_rows(a: &Reading, b: &Reading, channels: &[ChannelVariance]) -> Vec<SampleRow> {
    let present: Vec<(usize, &ChannelVariance)> = channels
        .iter()
        .enumerate()
        .filter(|(i, _)| a.channel(*i).is_some() && b.channel(*i).is_some())
        .collect();

    [a, b]
        .iter()
        .flat_map(|reading| {
            present.iter().filter_map(move |(i, c)| {
                reading.channel(*i).map(|value| SampleRow {
                    timestamp: reading.timestamp.clone(),
                    metric: reading.metric.clone(),
                    channel: c.channel.clone(),
                    value,
                })
            })
        })
        .collect()
}

/// Paired-sampling loop for one metric
pub struct VarianceMonitor {
    config: VarianceMetric,
    source: Arc<dyn MetricSource>,
    ctx: WorkerContext,
    previous: Option<Reading>,
}

impl VarianceMonitor {
    pub fn new(config: VarianceMetric, source: Arc<dyn MetricSource>, ctx: WorkerContext) -> Self {
        Self {
            config,
            source,
            ctx,
            previous: None,
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        info!(
            metric = %self.config.metric,
            channels = self.config.channels.len(),
            wait_interval_secs = self.config.wait_interval.as_secs_f64(),
            "Starting variance monitor"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let outcome = take_reading(
                self.source.as_ref(),
                &self.config.metric,
                self.ctx.clock.as_ref(),
            )
            .await;

            match outcome {
                ReadOutcome::Reading(reading) => {
                    if let Some(previous) = self.previous.take() {
                        self.compare(&previous, &reading).await;
                    }
                    self.previous = Some(reading);
                }
                ReadOutcome::Missing => {
                    self.ctx.logger.log_sensor_missing(&self.config.metric);
                    idle_while_missing(&mut shutdown).await;
                    break;
                }
                ReadOutcome::Failed(e) => log_read_failure(&self.ctx, &self.config.metric, &e),
            }

            if !shutdown.sleep(self.config.wait_interval).await {
                break;
            }
        }

        info!(metric = %self.config.metric, "Variance monitor stopped");
        Ok(())
    }

    async fn compare(&self, a: &Reading, b: &Reading) {
        let Some(largest_delta) = largest_excess(a, b, &self.config.channels) else {
            return;
        };

        let rows = pair_rows(a, b, &self.config.channels);
        let channels = rows.len() / 2;
        if self
            .ctx
            .write_samples(&self.config.metric, "variance", &rows)
            .await
        {
            self.ctx
                .logger
                .log_variance_recorded(&self.config.metric, channels, largest_delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(timestamp: &str, values: Vec<f64>) -> Reading {
        Reading::at("accelerometer", values, timestamp.to_string())
    }

    fn channels(variances: &[(&str, f64)]) -> Vec<ChannelVariance> {
        variances
            .iter()
            .map(|(name, v)| ChannelVariance::new("accelerometer", *name, *v).unwrap())
            .collect()
    }

    #[test]
    fn test_change_must_strictly_exceed_variance() {
        let a = reading("t0", vec![10.0]);
        let b = reading("t1", vec![10.5]);

        assert!(!exceeds_variance(&a, &b, &channels(&[("x", 1.0)])));
        assert!(!exceeds_variance(&a, &b, &channels(&[("x", 0.5)])));
        assert!(exceeds_variance(&a, &b, &channels(&[("x", 0.4)])));
    }

    #[test]
    fn test_any_channel_records_all_channels() {
        let a = reading("t0", vec![0.0, 5.0, 1.0]);
        let b = reading("t1", vec![0.01, 9.0, 1.0]);
        let config = channels(&[("x", 1.0), ("y", 1.0), ("z", 1.0)]);

        assert!(exceeds_variance(&a, &b, &config));
        let rows = pair_rows(&a, &b, &config);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].timestamp, "t0");
        assert_eq!(rows[3].timestamp, "t1");
        assert_eq!(rows[4].channel, "y");
        assert_eq!(rows[4].value, 9.0);
    }

    #[test]
    fn test_absent_channel_excluded() {
        let a = reading("t0", vec![0.0, 5.0, 1.0]);
        let b = reading("t1", vec![3.0, 5.0]);
        let config = channels(&[("x", 1.0), ("y", 1.0), ("z", 0.0)]);

        let rows = pair_rows(&a, &b, &config);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.channel != "z"));
    }

    #[test]
    fn test_absent_channel_cannot_trigger() {
        let a = reading("t0", vec![1.0]);
        let b = reading("t1", vec![1.0, 100.0]);
        let config = channels(&[("x", 1.0), ("y", 1.0)]);
        assert!(!exceeds_variance(&a, &b, &config));
    }
}
