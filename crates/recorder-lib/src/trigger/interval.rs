//! Interval recording: every reading is persisted on a fixed cadence

use super::{idle_while_missing, log_read_failure, take_reading, ReadOutcome, WorkerContext};
use crate::config::IntervalMetric;
use crate::models::{Reading, SampleRow};
use crate::shutdown::Shutdown;
use crate::source::MetricSource;
use std::sync::Arc;
use tracing::info;

pub struct IntervalRecorder {
    config: IntervalMetric,
    source: Arc<dyn MetricSource>,
    ctx: WorkerContext,
}

impl IntervalRecorder {
    pub fn new(config: IntervalMetric, source: Arc<dyn MetricSource>, ctx: WorkerContext) -> Self {
        Self {
            config,
            source,
            ctx,
        }
    }

    /// One row per configured channel present in `reading`
    pub fn rows(&self, reading: &Reading) -> Vec<SampleRow> {
        self.config
            .channels
            .iter()
            .enumerate()
            .filter_map(|(i, channel)| {
                reading.channel(i).map(|value| SampleRow {
                    timestamp: reading.timestamp.clone(),
                    metric: self.config.metric.clone(),
                    channel: channel.clone(),
                    value,
                })
            })
            .collect()
    }

    pub async fn run(self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        info!(
            metric = %self.config.metric,
            interval_secs = self.config.interval.as_secs_f64(),
            "Starting interval recorder"
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
                    let rows = self.rows(&reading);
                    self.ctx
                        .write_samples(&self.config.metric, "interval", &rows)
                        .await;
                }
                ReadOutcome::Missing => {
                    self.ctx.logger.log_sensor_missing(&self.config.metric);
                    idle_while_missing(&mut shutdown).await;
                    break;
                }
                ReadOutcome::Failed(e) => log_read_failure(&self.ctx, &self.config.metric, &e),
            }

            if !shutdown.sleep(self.config.interval).await {
                break;
            }
        }

        info!(metric = %self.config.metric, "Interval recorder stopped");
        Ok(())
    }
}
