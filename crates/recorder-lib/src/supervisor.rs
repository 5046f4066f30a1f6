//! Worker supervision
//!
//! A supervisor owns one worker future factory. When the worker returns
//! (error, panic or a clean exit it was not asked for) the supervisor
//! relaunches it with fresh state. Restarts are counted inside a reset
//! window; hitting `max_restarts` inside that window parks the supervisor
//! in [`WorkerState::Error`] until shutdown. No further restarts are made
//! after that, so a broken sensor cannot turn into a hot restart loop.

use crate::observability::RecorderMetrics;
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default restart cap inside one reset window
pub const DEFAULT_MAX_RESTARTS: u32 = 10;

/// Default quiet period after which the restart counter starts over
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Lifecycle of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Error,
    Stopped,
}

impl WorkerState {
    pub const ALL: [WorkerState; 5] = [
        WorkerState::Starting,
        WorkerState::Running,
        WorkerState::Restarting,
        WorkerState::Error,
        WorkerState::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Restarting => "restarting",
            WorkerState::Error => "error",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restart cap and reset window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub reset_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            reset_window: DEFAULT_RESET_WINDOW,
        }
    }
}

impl RestartPolicy {
    pub fn with_max_restarts(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            ..Self::default()
        }
    }
}

/// Restart count as seen at `now`: zero once `window` has passed since the
/// last restart without another one.
pub fn effective_restart_count(
    now: Instant,
    last_restart: Option<Instant>,
    count: u32,
    window: Duration,
) -> u32 {
    match last_restart {
        Some(last) if now.saturating_duration_since(last) >= window => 0,
        _ => count,
    }
}

/// What to do after a worker ended unexpectedly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    GiveUp,
}

/// Restart bookkeeping for one supervisor
#[derive(Debug, Default, Clone)]
pub struct RestartTracker {
    count: u32,
    last_restart: Option<Instant>,
}

impl RestartTracker {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Count as seen at `now`, after applying the reset window
    pub fn effective_count(&self, now: Instant, window: Duration) -> u32 {
        effective_restart_count(now, self.last_restart, self.count, window)
    }

    /// Register a crash at `now` and decide whether to relaunch
    pub fn record_crash(&mut self, now: Instant, policy: &RestartPolicy) -> RestartDecision {
        self.count =
            effective_restart_count(now, self.last_restart, self.count, policy.reset_window) + 1;
        self.last_restart = Some(now);

        if self.count < policy.max_restarts {
            RestartDecision::Restart
        } else {
            RestartDecision::GiveUp
        }
    }
}

/// Observer side of a supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    name: String,
    state: watch::Receiver<WorkerState>,
    restarts: watch::Receiver<RestartTracker>,
    reset_window: Duration,
    stop: ShutdownTrigger,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SupervisorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Restart count inside the current reset window. A supervisor parked
    /// in Error keeps reporting the count that put it there.
    pub fn restart_count(&self) -> u32 {
        let tracker = self.restarts.borrow().clone();
        if self.state() == WorkerState::Error {
            tracker.count()
        } else {
            tracker.effective_count(Instant::now(), self.reset_window)
        }
    }

    /// Ask this supervisor (and its worker) to stop
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl Fn(WorkerState) -> bool) -> WorkerState {
        let mut state = self.state.clone();
        let result = state.wait_for(|s| predicate(*s)).await.map(|s| *s);
        match result {
            Ok(s) => s,
            Err(_) => *state.borrow(),
        }
    }

    /// Wait for the supervisor task to finish. Later calls return at once.
    pub async fn join(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(worker = %self.name, error = %e, "Supervisor task failed");
            }
        }
    }
}

/// Builder for a supervised worker
pub struct SupervisorBuilder {
    name: String,
    policy: RestartPolicy,
    metrics: Option<RecorderMetrics>,
}

impl SupervisorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RestartPolicy::default(),
            metrics: None,
        }
    }

    pub fn policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn metrics(mut self, metrics: RecorderMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start supervising `work`. The factory is called once per launch and
    /// receives a shutdown signal scoped to that launch.
    pub fn spawn<F, Fut>(self, shutdown: Shutdown, work: F) -> SupervisorHandle
    where
        F: Fn(Shutdown) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let (restarts_tx, restarts) = watch::channel(RestartTracker::default());
        let (stop_trigger, stop) = shutdown::channel();

        let supervisor = Supervisor {
            name: self.name.clone(),
            policy: self.policy,
            metrics: self.metrics,
            work,
            state: state_tx,
            restarts: restarts_tx,
            _stop_guard: stop_trigger.clone(),
        };
        let task = tokio::spawn(supervisor.run(shutdown, stop));

        SupervisorHandle {
            name: self.name,
            state: state_rx,
            restarts,
            reset_window: self.policy.reset_window,
            stop: stop_trigger,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Supervise `work` with the default reset window
pub fn supervise<F, Fut>(
    name: impl Into<String>,
    max_restarts: u32,
    shutdown: Shutdown,
    work: F,
) -> SupervisorHandle
where
    F: Fn(Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    SupervisorBuilder::new(name)
        .policy(RestartPolicy::with_max_restarts(max_restarts))
        .spawn(shutdown, work)
}

struct Supervisor<F> {
    name: String,
    policy: RestartPolicy,
    metrics: Option<RecorderMetrics>,
    work: F,
    state: watch::Sender<WorkerState>,
    restarts: watch::Sender<RestartTracker>,
    // Dropping every handle detaches the worker instead of stopping it
    _stop_guard: ShutdownTrigger,
}

impl<F, Fut> Supervisor<F>
where
    F: Fn(Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(self, mut global: Shutdown, mut stop: Shutdown) {
        let mut tracker = RestartTracker::default();
        debug!(worker = %self.name, "Starting supervised worker");

        loop {
            if global.is_triggered() || stop.is_triggered() {
                self.set_state(WorkerState::Stopped);
                return;
            }

            let (worker_trigger, worker_shutdown) = shutdown::channel();
            let mut task = tokio::spawn((self.work)(worker_shutdown));
            self.set_state(WorkerState::Running);

            let finished = tokio::select! {
                result = &mut task => Some(result),
                _ = global.wait() => None,
                _ = stop.wait() => None,
            };

            let result = match finished {
                Some(result) => result,
                None => {
                    worker_trigger.trigger();
                    if let Ok(Err(e)) = task.await {
                        debug!(worker = %self.name, error = %e, "Worker returned an error while stopping");
                    }
                    info!(worker = %self.name, "Supervised worker stopped");
                    self.set_state(WorkerState::Stopped);
                    return;
                }
            };

            if global.is_triggered() || stop.is_triggered() {
                self.set_state(WorkerState::Stopped);
                return;
            }

            match result {
                Ok(Ok(())) => warn!(worker = %self.name, "Worker exited unexpectedly"),
                Ok(Err(e)) => warn!(worker = %self.name, error = %e, "Worker failed"),
                Err(e) if e.is_panic() => error!(worker = %self.name, "Worker panicked"),
                Err(e) => warn!(worker = %self.name, error = %e, "Worker task aborted"),
            }

            self.set_state(WorkerState::Restarting);
            let decision = tracker.record_crash(Instant::now(), &self.policy);
            self.restarts.send_replace(tracker.clone());

            match decision {
                RestartDecision::Restart => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_worker_restarts(&self.name);
                    }
                    info!(
                        worker = %self.name,
                        restart_count = tracker.count(),
                        "Restarting worker"
                    );
                }
                RestartDecision::GiveUp => {
                    error!(
                        worker = %self.name,
                        restart_count = tracker.count(),
                        window_secs = self.policy.reset_window.as_secs(),
                        "Worker restarted too often, no further restart attempts will be made"
                    );
                    self.set_state(WorkerState::Error);
                    tokio::select! {
                        _ = global.wait() => {}
                        _ = stop.wait() => {}
                    }
                    return;
                }
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_restart_count_resets_after_window() {
        let start = Instant::now();
        let window = Duration::from_secs(60);

        assert_eq!(effective_restart_count(start, None, 0, window), 0);
        assert_eq!(
            effective_restart_count(start + Duration::from_secs(59), Some(start), 3, window),
            3
        );
        assert_eq!(
            effective_restart_count(start + Duration::from_secs(60), Some(start), 3, window),
            0
        );
    }

    #[test]
    fn test_isolated_crashes_are_not_one_burst() {
        let policy = RestartPolicy::with_max_restarts(2);
        let mut tracker = RestartTracker::default();
        let start = Instant::now();

        assert_eq!(tracker.record_crash(start, &policy), RestartDecision::Restart);
        assert_eq!(tracker.count(), 1);

        // Clean run for more than the window, then another crash
        let later = start + Duration::from_secs(61);
        assert_eq!(tracker.record_crash(later, &policy), RestartDecision::Restart);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_burst_gives_up_at_cap() {
        let policy = RestartPolicy::with_max_restarts(3);
        let mut tracker = RestartTracker::default();
        let start = Instant::now();

        assert_eq!(tracker.record_crash(start, &policy), RestartDecision::Restart);
        assert_eq!(
            tracker.record_crash(start + Duration::from_secs(1), &policy),
            RestartDecision::Restart
        );
        assert_eq!(
            tracker.record_crash(start + Duration::from_secs(2), &policy),
            RestartDecision::GiveUp
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_storm_escalates_to_error() {
        let (trigger, shutdown) = shutdown::channel();
        let launches = Arc::new(AtomicUsize::new(0));
        let counter = launches.clone();

        let handle = supervise("flaky", 4, shutdown, move |_shutdown| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), anyhow::Error>(anyhow::anyhow!("sensor bus fault"))
            }
        });

        let state = handle.wait_for(|s| s == WorkerState::Error).await;
        assert_eq!(state, WorkerState::Error);
        assert_eq!(launches.load(Ordering::SeqCst), 4);

        // Parked: no further launches even after time passes
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(launches.load(Ordering::SeqCst), 4);
        assert_eq!(handle.state(), WorkerState::Error);

        trigger.trigger();
        handle.join().await;
        assert_eq!(handle.state(), WorkerState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_restarted() {
        let (trigger, shutdown) = shutdown::channel();
        let launches = Arc::new(AtomicUsize::new(0));
        let counter = launches.clone();

        let handle = supervise("panicky", 10, shutdown, move |mut shutdown| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("driver bug");
                }
                shutdown.wait().await;
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state(), WorkerState::Running);
        assert_eq!(handle.restart_count(), 1);

        trigger.trigger();
        handle.join().await;
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_count_resets_after_quiet_window() {
        let (trigger, shutdown) = shutdown::channel();
        let launches = Arc::new(AtomicUsize::new(0));
        let counter = launches.clone();

        // Two quick crashes, then a launch that stays up
        let handle = supervise("recovering", 10, shutdown, move |mut shutdown| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("sensor bus fault");
                }
                shutdown.wait().await;
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), WorkerState::Running);
        assert_eq!(handle.restart_count(), 2);

        tokio::time::sleep(DEFAULT_RESET_WINDOW).await;
        assert_eq!(handle.restart_count(), 0);

        trigger.trigger();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_crashes_never_reach_cap() {
        let (trigger, shutdown) = shutdown::channel();
        let launches = Arc::new(AtomicUsize::new(0));
        let counter = launches.clone();

        // Each launch runs cleanly for 61s, then crashes
        let handle = supervise("slow-crash", 2, shutdown, move |mut shutdown| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !shutdown.sleep(Duration::from_secs(61)).await {
                    return Ok(());
                }
                anyhow::bail!("transient fault")
            }
        });

        tokio::time::sleep(Duration::from_secs(61 * 5 + 1)).await;
        assert!(launches.load(Ordering::SeqCst) >= 5);
        assert_ne!(handle.state(), WorkerState::Error);
        assert_eq!(handle.restart_count(), 1);

        trigger.trigger();
        handle.join().await;
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stop_only_stops_one_worker() {
        let (trigger, shutdown) = shutdown::channel();
        let work = |mut shutdown: Shutdown| async move {
            shutdown.wait().await;
            Ok::<(), anyhow::Error>(())
        };

        let first = supervise("first", 10, shutdown.clone(), work);
        let second = supervise("second", 10, shutdown, work);
        first.wait_for(|s| s == WorkerState::Running).await;
        second.wait_for(|s| s == WorkerState::Running).await;

        first.stop();
        first.join().await;
        assert_eq!(first.state(), WorkerState::Stopped);
        assert_eq!(second.state(), WorkerState::Running);

        trigger.trigger();
        second.join().await;
        assert_eq!(second.state(), WorkerState::Stopped);
    }
}
