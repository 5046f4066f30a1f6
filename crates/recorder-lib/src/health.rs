//! Health check infrastructure for the recorder
//!
//! Maps supervisor state per worker onto component health for liveness and
//! readiness probes.

use crate::observability::RecorderMetrics;
use crate::supervisor::{SupervisorHandle, WorkerState};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is starting or restarting
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }

    pub fn from_worker_state(state: WorkerState) -> Self {
        match state {
            WorkerState::Running | WorkerState::Stopped => ComponentStatus::Healthy,
            WorkerState::Starting | WorkerState::Restarting => ComponentStatus::Degraded,
            WorkerState::Error => ComponentStatus::Unhealthy,
        }
    }
}

/// Health of one supervised worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub status: ComponentStatus,
    pub state: WorkerState,
    pub restart_count: u32,
}

impl WorkerHealth {
    fn of(handle: &SupervisorHandle) -> Self {
        let state = handle.state();
        Self {
            status: ComponentStatus::from_worker_state(state),
            state,
            restart_count: handle.restart_count(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub workers: BTreeMap<String, WorkerHealth>,
}

impl HealthResponse {
    /// Compute overall status from worker statuses
    pub fn compute_status<'a>(
        statuses: impl IntoIterator<Item = &'a ComponentStatus>,
    ) -> ComponentStatus {
        let mut has_degraded = false;

        for status in statuses {
            match status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Registry of supervised workers
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<DashMap<String, SupervisorHandle>>,
    ready: Arc<AtomicBool>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker's supervisor
    pub fn register(&self, handle: SupervisorHandle) {
        self.workers.insert(handle.name().to_string(), handle);
    }

    pub fn get(&self, name: &str) -> Option<SupervisorHandle> {
        self.workers.get(name).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Set readiness status
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Tally of workers per state
    pub fn state_counts(&self) -> HashMap<WorkerState, i64> {
        let mut counts = HashMap::new();
        for entry in self.workers.iter() {
            *counts.entry(entry.value().state()).or_insert(0) += 1;
        }
        counts
    }

    /// Refresh the per-state worker gauges
    pub fn update_metrics(&self, metrics: &RecorderMetrics) {
        metrics.set_workers_by_state(&self.state_counts());
    }

    /// Get health response
    pub fn health(&self) -> HealthResponse {
        let workers: BTreeMap<String, WorkerHealth> = self
            .workers
            .iter()
            .map(|entry| (entry.key().clone(), WorkerHealth::of(entry.value())))
            .collect();
        let status = HealthResponse::compute_status(workers.values().map(|w| &w.status));
        HealthResponse { status, workers }
    }

    /// Get readiness response
    ///
    /// A worker parked in Error only affects its own metric, so it makes
    /// the recorder unhealthy but not unready.
    pub fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Recorder not yet initialized".to_string()),
            };
        }

        let health = self.health();
        let all_failed = !health.workers.is_empty()
            && health
                .workers
                .values()
                .all(|w| w.status == ComponentStatus::Unhealthy);

        if all_failed {
            ReadinessResponse {
                ready: false,
                reason: Some("Every worker is in error state".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
