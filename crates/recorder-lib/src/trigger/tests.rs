//! Recording worker tests
//!
//! Workers run against scripted sources and an in-memory sink with tokio's
//! clock paused, so poll intervals of minutes or hours complete instantly.

#[cfg(test)]
mod threshold_tests {
    use crate::alert::{alert_channel, AlertDeduplicator};
    use crate::clock::MonotonicClock;
    use crate::config::{AlertPolicy, SeverityPolicy, ThresholdMetric, ThresholdWindow};
    use crate::models::{Reading, TriggerState};
    use crate::observability::{RecorderMetrics, StructuredLogger};
    use crate::shutdown;
    use crate::sink::MemorySink;
    use crate::source::testing::{ScriptedSource, Step};
    use crate::trigger::{classify, Cycle, ErrorTracker, ThresholdMonitor, WorkerContext};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn window(low: f64, high: f64) -> ThresholdWindow {
        ThresholdWindow::new("pressure", "pressure", low, high).unwrap()
    }

    fn pressure_metric() -> ThresholdMetric {
        ThresholdMetric::new(
            "pressure",
            vec![window(300.0, 1200.0)],
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn context(sink: Arc<MemorySink>) -> WorkerContext {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        WorkerContext::new(
            sink,
            RecorderMetrics::new().unwrap(),
            StructuredLogger::new("test-node"),
        )
        .with_clock(Arc::new(MonotonicClock::starting_at(origin)))
    }

    fn reading(timestamp: &str, values: Vec<f64>) -> Reading {
        Reading::at("pressure", values, timestamp.to_string())
    }

    #[test]
    fn test_boundaries_never_classify_normal() {
        let w = window(10.0, 20.0);
        assert_eq!(classify(10.0, &w), TriggerState::Low);
        assert_eq!(classify(20.0, &w), TriggerState::High);
        assert_eq!(classify(9.5, &w), TriggerState::Low);
        assert_eq!(classify(20.5, &w), TriggerState::High);
        assert_eq!(classify(15.0, &w), TriggerState::Normal);

        for step in 0..=300 {
            let v = step as f64 * 0.1;
            let expected = if v <= 10.0 {
                TriggerState::Low
            } else if v >= 20.0 {
                TriggerState::High
            } else {
                TriggerState::Normal
            };
            assert_eq!(classify(v, &w), expected, "value {}", v);
        }
    }

    #[tokio::test]
    async fn test_repeated_classification_writes_once() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::missing());
        let mut monitor = ThresholdMonitor::new(pressure_metric(), source, context(sink.clone()));

        monitor.process(&reading("t0", vec![1250.0])).await;
        monitor.process(&reading("t1", vec![1300.0])).await;

        let events = sink.trigger_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, TriggerState::High);
        assert_eq!(events[0].value, 1250.0);
        assert_eq!(monitor.state("pressure"), Some(TriggerState::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_persisted_in_order() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::scalars(&[
            800.0, 810.0, 1250.0, 1260.0, 900.0, 250.0,
        ]));
        let monitor = ThresholdMonitor::new(pressure_metric(), source.clone(), context(sink.clone()));

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(monitor.run(shutdown));

        // Six reads at 60s spacing
        tokio::time::sleep(Duration::from_secs(5 * 60 + 30)).await;
        trigger.trigger();
        task.await.unwrap().unwrap();

        let states: Vec<_> = sink.trigger_events().iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                TriggerState::Normal,
                TriggerState::High,
                TriggerState::Normal,
                TriggerState::Low
            ]
        );
        assert_eq!(source.reads(), 6);
        assert_eq!(sink.trigger_events()[1].timestamp, "2024-01-01 00:02:00.000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sensor_idles_without_rows() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::missing());
        let mut monitor =
            ThresholdMonitor::new(pressure_metric(), source.clone(), context(sink.clone()));

        assert_eq!(monitor.cycle().await, Cycle::Missing);
        assert_eq!(monitor.state("pressure"), Some(TriggerState::SensorMissing));

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(monitor.run(shutdown));
        tokio::time::sleep(Duration::from_secs(3600)).await;
        trigger.trigger();
        task.await.unwrap().unwrap();

        // One read from cycle(), one from run(); no reattachment attempts
        assert_eq!(source.reads(), 2);
        assert!(sink.trigger_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_skips_cycle() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Fail,
            Step::Values(vec![f64::NAN]),
            Step::Values(vec![100.0]),
        ]));
        let metrics = RecorderMetrics::new().unwrap();
        let mut ctx = context(sink.clone());
        ctx.metrics = metrics.clone();
        let mut monitor = ThresholdMonitor::new(pressure_metric(), source, ctx);

        assert_eq!(monitor.cycle().await, Cycle::Failed);
        assert_eq!(monitor.cycle().await, Cycle::Failed);
        assert_eq!(monitor.state("pressure"), Some(TriggerState::Starting));
        assert_eq!(monitor.cycle().await, Cycle::Classified);

        let events = sink.trigger_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, TriggerState::Low);

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("sensor_recorder_source_errors_total{metric=\"pressure\"} 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_errors_enter_error_state() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Values(vec![800.0]),
            Step::Fail,
            Step::Fail,
            Step::Fail,
            Step::Values(vec![810.0]),
        ]));
        let mut monitor = ThresholdMonitor::new(pressure_metric(), source, context(sink.clone()))
            .with_error_tracker(ErrorTracker::new(3, Duration::from_secs(60)));

        monitor.cycle().await;
        assert_eq!(monitor.state("pressure"), Some(TriggerState::Normal));

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            monitor.cycle().await;
        }
        assert_eq!(monitor.state("pressure"), Some(TriggerState::Error));

        // Recovery is an ordinary transition back to Normal
        tokio::time::advance(Duration::from_secs(5)).await;
        monitor.cycle().await;
        let states: Vec<_> = sink.trigger_events().iter().map(|e| e.state).collect();
        assert_eq!(states, vec![TriggerState::Normal, TriggerState::Normal]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spread_out_errors_do_not_escalate() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::new(vec![Step::Values(vec![800.0]), Step::Fail]));
        let mut monitor = ThresholdMonitor::new(pressure_metric(), source, context(sink))
            .with_error_tracker(ErrorTracker::new(3, Duration::from_secs(60)));

        monitor.cycle().await;
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(61)).await;
            monitor.cycle().await;
        }
        assert_eq!(monitor.state("pressure"), Some(TriggerState::Normal));
    }

    #[tokio::test]
    async fn test_sink_failure_still_updates_state() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::missing());
        let mut monitor = ThresholdMonitor::new(pressure_metric(), source, context(sink.clone()));

        sink.set_fail_writes(true);
        monitor.process(&reading("t0", vec![1500.0])).await;
        assert_eq!(monitor.state("pressure"), Some(TriggerState::High));

        sink.set_fail_writes(false);
        monitor.process(&reading("t1", vec![1500.0])).await;
        assert!(sink.trigger_events().is_empty());

        monitor.process(&reading("t2", vec![700.0])).await;
        assert_eq!(sink.trigger_events().len(), 1);
    }

    #[tokio::test]
    async fn test_multi_channel_independent_states() {
        let sink = Arc::new(MemorySink::new());
        let config = ThresholdMetric::new(
            "accelerometer",
            vec![
                ThresholdWindow::new("accelerometer", "x", -1.0, 1.0).unwrap(),
                ThresholdWindow::new("accelerometer", "y", -1.0, 1.0).unwrap(),
                ThresholdWindow::new("accelerometer", "z", -1.0, 1.0).unwrap(),
            ],
            Duration::from_secs(1),
        )
        .unwrap();
        let mut monitor =
            ThresholdMonitor::new(config, Arc::new(ScriptedSource::missing()), context(sink.clone()));

        monitor
            .process(&Reading::at("accelerometer", vec![0.0, 0.0, 0.0], "t0".into()))
            .await;
        // z absent from this reading: skipped, keeps its state
        monitor
            .process(&Reading::at("accelerometer", vec![0.0, 2.0], "t1".into()))
            .await;

        assert_eq!(monitor.state("x"), Some(TriggerState::Normal));
        assert_eq!(monitor.state("y"), Some(TriggerState::High));
        assert_eq!(monitor.state("z"), Some(TriggerState::Normal));
        assert_eq!(sink.trigger_events().len(), 4);
    }

    #[tokio::test]
    async fn test_alerts_forwarded_through_deduplicator() {
        let sink = Arc::new(MemorySink::new());
        let (queue, mut rx) = alert_channel(8, None);
        let severity = SeverityPolicy {
            enabled: true,
            send_on_normal: false,
        };
        let policy = AlertPolicy {
            resend_interval: Some(Duration::from_secs(3600)),
            high: severity,
            low: severity,
        };
        let mut monitor = ThresholdMonitor::new(
            pressure_metric(),
            Arc::new(ScriptedSource::missing()),
            context(sink),
        )
        .with_alerts(AlertDeduplicator::new("pressure", policy, queue));

        monitor.process(&reading("t0", vec![800.0])).await;
        monitor.process(&reading("t1", vec![1300.0])).await;
        monitor.process(&reading("t2", vec![1310.0])).await;
        monitor.process(&reading("t3", vec![800.0])).await;

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.state, TriggerState::High);
        assert_eq!(alert.value, 1300.0);
        assert_eq!(alert.timestamp, "t1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_long_poll() {
        let sink = Arc::new(MemorySink::new());
        let config = ThresholdMetric::new(
            "pressure",
            vec![window(300.0, 1200.0)],
            Duration::from_secs(6 * 3600),
        )
        .unwrap();
        let monitor = ThresholdMonitor::new(
            config,
            Arc::new(ScriptedSource::scalars(&[800.0])),
            context(sink),
        );

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(monitor.run(shutdown));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let start = tokio::time::Instant::now();
        trigger.trigger();
        task.await.unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

#[cfg(test)]
mod variance_tests {
    use crate::clock::MonotonicClock;
    use crate::config::{ChannelVariance, VarianceMetric};
    use crate::observability::{RecorderMetrics, StructuredLogger};
    use crate::shutdown;
    use crate::sink::MemorySink;
    use crate::source::testing::{ScriptedSource, Step};
    use crate::trigger::{VarianceMonitor, WorkerContext};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn humidity(variance: f64) -> VarianceMetric {
        VarianceMetric::new(
            "humidity",
            vec![ChannelVariance::new("humidity", "humidity", variance).unwrap()],
            WAIT,
        )
        .unwrap()
    }

    fn context(sink: Arc<MemorySink>) -> WorkerContext {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        WorkerContext::new(
            sink,
            RecorderMetrics::new().unwrap(),
            StructuredLogger::new("test-node"),
        )
        .with_clock(Arc::new(MonotonicClock::starting_at(origin)))
    }

    /// Run the monitor long enough for `reads` readings
    async fn run_for(monitor: VarianceMonitor, reads: u32) {
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(monitor.run(shutdown));
        tokio::time::sleep(WAIT * (reads - 1) + WAIT / 2).await;
        trigger.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_change_writes_nothing() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::scalars(&[10.0, 10.5]));
        run_for(VarianceMonitor::new(humidity(1.0), source, context(sink.clone())), 2).await;

        assert!(sink.samples().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_change_writes_both_readings() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::scalars(&[10.0, 10.5]));
        run_for(VarianceMonitor::new(humidity(0.4), source, context(sink.clone())), 2).await;

        let samples = sink.samples();
        let values: Vec<_> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 10.5]);
        assert_eq!(samples[0].timestamp, "2024-01-01 00:00:00.000");
        assert_eq!(samples[1].timestamp, "2024-01-01 00:00:10.000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairs_slide() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::scalars(&[10.0, 10.3, 10.9]));
        run_for(
            VarianceMonitor::new(humidity(0.5), source.clone(), context(sink.clone())),
            3,
        )
        .await;

        // (10.0, 10.3) is quiet; the next pair is (10.3, 10.9), not a fresh sample
        let values: Vec<_> = sink.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.3, 10.9]);
        assert_eq!(source.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_pairs_do_not_duplicate_rows() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::scalars(&[10.0, 12.0, 14.0]));
        run_for(VarianceMonitor::new(humidity(1.0), source, context(sink.clone())), 3).await;

        let values: Vec<_> = sink.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 12.0, 14.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_keeps_previous_reading() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Values(vec![10.0]),
            Step::Fail,
            Step::Values(vec![12.0]),
        ]));
        run_for(VarianceMonitor::new(humidity(1.0), source, context(sink.clone())), 3).await;

        let values: Vec<_> = sink.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 12.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sensor_writes_nothing() {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(ScriptedSource::missing());
        run_for(
            VarianceMonitor::new(humidity(0.0), source.clone(), context(sink.clone())),
            30,
        )
        .await;

        assert!(sink.samples().is_empty());
        assert_eq!(source.reads(), 1);
    }
}

#[cfg(test)]
mod interval_tests {
    use crate::clock::MonotonicClock;
    use crate::config::IntervalMetric;
    use crate::observability::{RecorderMetrics, StructuredLogger};
    use crate::shutdown;
    use crate::sink::MemorySink;
    use crate::source::testing::ScriptedSource;
    use crate::trigger::{IntervalRecorder, WorkerContext};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_every_cycle_is_recorded() {
        let sink = Arc::new(MemorySink::new());
        let metrics = RecorderMetrics::new().unwrap();
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ctx = WorkerContext::new(sink.clone(), metrics.clone(), StructuredLogger::new("n"))
            .with_clock(Arc::new(MonotonicClock::starting_at(origin)));

        let config = IntervalMetric::new(
            "load_average",
            vec!["1m".to_string(), "5m".to_string(), "15m".to_string()],
            Duration::from_secs(300),
        )
        .unwrap();
        let source = Arc::new(ScriptedSource::values(vec![
            vec![0.5, 0.4, 0.3],
            vec![0.6, 0.4, 0.3],
            vec![0.7, 0.5],
        ]));
        let recorder = IntervalRecorder::new(config, source, ctx);

        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(recorder.run(shutdown));
        tokio::time::sleep(Duration::from_secs(650)).await;
        trigger.trigger();
        task.await.unwrap().unwrap();

        let samples = sink.samples();
        assert_eq!(samples.len(), 8);
        assert_eq!(samples[0].channel, "1m");
        assert_eq!(samples[7].timestamp, "2024-01-01 00:10:00.000");

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains(
            "sensor_recorder_samples_recorded_total{metric=\"load_average\",mode=\"interval\"} 8"
        ));
    }
}
