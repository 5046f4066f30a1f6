//! Recording engine
//!
//! Builds one supervised worker per enabled metric from a validated
//! [`RecordingPlan`], plus the alert dispatcher when alerting is on. All
//! workers share one shutdown signal owned by the [`EngineHandle`].

use crate::alert::{
    alert_channel, AlertDeduplicator, AlertDispatcher, AlertQueue, AlertSink, LogAlertSink,
    DEFAULT_ALERT_QUEUE_SIZE,
};
use crate::clock::Clock;
use crate::config::{AlertPolicy, RecordingPlan};
use crate::health::WorkerRegistry;
use crate::observability::{RecorderMetrics, StructuredLogger};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::sink::RecordingSink;
use crate::source::{MetricSource, SourceRegistry};
use crate::supervisor::{SupervisorBuilder, SupervisorHandle};
use crate::trigger::{IntervalRecorder, ThresholdMonitor, VarianceMonitor, WorkerContext};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct RecordingEngine {
    plan: RecordingPlan,
    sources: SourceRegistry,
    ctx: WorkerContext,
    alert_sink: Option<Arc<dyn AlertSink>>,
    alert_queue_size: usize,
}

impl RecordingEngine {
    pub fn new(
        plan: RecordingPlan,
        sources: SourceRegistry,
        sink: Arc<dyn RecordingSink>,
        metrics: RecorderMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            plan,
            sources,
            ctx: WorkerContext::new(sink, metrics, logger),
            alert_sink: None,
            alert_queue_size: DEFAULT_ALERT_QUEUE_SIZE,
        }
    }

    /// Deliver alerts here instead of the log
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn with_alert_queue_size(mut self, size: usize) -> Self {
        self.alert_queue_size = size;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx = self.ctx.with_clock(clock);
        self
    }

    fn source_for(&self, family: &str, metric: &str) -> Option<Arc<dyn MetricSource>> {
        let source = self.sources.get(metric);
        if source.is_none() {
            warn!(
                family = %family,
                metric = %metric,
                "No source registered for metric, not recording it"
            );
        }
        source
    }

    fn supervise<F, Fut>(&self, name: String, shutdown: &Shutdown, work: F) -> SupervisorHandle
    where
        F: Fn(Shutdown) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        SupervisorBuilder::new(name)
            .policy(self.plan.restart_policy)
            .metrics(self.ctx.metrics.clone())
            .spawn(shutdown.clone(), work)
    }

    /// Spawn every worker and return the handle that owns them
    pub fn start(self) -> EngineHandle {
        let (trigger, shutdown) = shutdown::channel();
        let registry = WorkerRegistry::new();
        let mut workers = Vec::new();

        let (alerts, dispatcher) = match self.plan.alert_policy {
            Some(policy) => {
                let (queue, rx) =
                    alert_channel(self.alert_queue_size, Some(self.ctx.metrics.clone()));
                let sink: Arc<dyn AlertSink> = match &self.alert_sink {
                    Some(sink) => sink.clone(),
                    None => Arc::new(LogAlertSink::new(self.ctx.logger.node_name())),
                };
                let dispatcher = AlertDispatcher::new(sink).with_metrics(self.ctx.metrics.clone());
                let task = tokio::spawn(dispatcher.run(rx, shutdown.clone()));
                (Some((policy, queue)), Some(task))
            }
            None => (None, None),
        };

        for metric in &self.plan.thresholds {
            let Some(source) = self.source_for("threshold", &metric.metric) else {
                continue;
            };
            let config = metric.clone();
            let ctx = self.ctx.clone();
            let worker_alerts: Option<(AlertPolicy, AlertQueue)> = alerts.clone();
            workers.push(self.supervise(
                format!("threshold:{}", metric.metric),
                &shutdown,
                move |shutdown| {
                    let mut monitor =
                        ThresholdMonitor::new(config.clone(), source.clone(), ctx.clone());
                    if let Some((policy, queue)) = &worker_alerts {
                        monitor = monitor.with_alerts(AlertDeduplicator::new(
                            config.metric.clone(),
                            *policy,
                            queue.clone(),
                        ));
                    }
                    monitor.run(shutdown)
                },
            ));
        }

        for metric in &self.plan.variances {
            let Some(source) = self.source_for("variance", &metric.metric) else {
                continue;
            };
            let config = metric.clone();
            let ctx = self.ctx.clone();
            workers.push(self.supervise(
                format!("variance:{}", metric.metric),
                &shutdown,
                move |shutdown| {
                    VarianceMonitor::new(config.clone(), source.clone(), ctx.clone()).run(shutdown)
                },
            ));
        }

        for metric in &self.plan.intervals {
            let Some(source) = self.source_for("interval", &metric.metric) else {
                continue;
            };
            let config = metric.clone();
            let ctx = self.ctx.clone();
            workers.push(self.supervise(
                format!("interval:{}", metric.metric),
                &shutdown,
                move |shutdown| {
                    IntervalRecorder::new(config.clone(), source.clone(), ctx.clone()).run(shutdown)
                },
            ));
        }

        for worker in &workers {
            registry.register(worker.clone());
        }
        registry.set_ready(true);

        info!(
            workers = workers.len(),
            configured = self.plan.worker_count(),
            alerts = dispatcher.is_some(),
            "Recording engine started"
        );

        EngineHandle {
            trigger,
            workers,
            registry,
            dispatcher,
            logger: self.ctx.logger,
        }
    }
}

/// Running engine
pub struct EngineHandle {
    trigger: ShutdownTrigger,
    workers: Vec<SupervisorHandle>,
    registry: WorkerRegistry,
    dispatcher: Option<JoinHandle<()>>,
    logger: StructuredLogger,
}

impl EngineHandle {
    pub fn workers(&self) -> &[SupervisorHandle] {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<&SupervisorHandle> {
        self.workers.iter().find(|w| w.name() == name)
    }

    pub fn registry(&self) -> WorkerRegistry {
        self.registry.clone()
    }

    /// Signal every worker to stop and wait for their supervisors
    pub async fn shutdown(self) {
        self.registry.set_ready(false);
        self.trigger.trigger();

        for worker in &self.workers {
            worker.join().await;
            self.logger
                .log_worker_state(worker.name(), worker.state(), worker.restart_count());
        }

        if let Some(dispatcher) = self.dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Alert dispatcher task failed");
            }
        }

        info!(workers = self.workers.len(), "Recording engine stopped");
    }
}
