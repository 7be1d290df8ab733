//! Activity execution logic

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::ActivityConfig;
use crate::error::{Error, Result};
use crate::error_handler::OpError;
use crate::metrics::ActivityMetrics;
use crate::motor::{Motor, MotorHandle, MotorStats};
use crate::state::{RunState, RunStateTally, TallySnapshot};

use super::aggregator::{aggregate_motor_stats, ActivitySummary};
use super::{ActivityController, StopReason};

/// States in which a motor may still dispatch or drain
const ACTIVE: [RunState; 4] = [
    RunState::Uninitialized,
    RunState::Starting,
    RunState::Running,
    RunState::Stopping,
];

/// State shared between the activity and its stop paths
pub(crate) struct ActivityShared {
    alias: String,
    tally: Arc<RunStateTally>,
    handles: Vec<Arc<MotorHandle>>,
    stop_reason: Mutex<Option<StopReason>>,
}

impl ActivityShared {
    pub(crate) fn new(
        alias: String,
        tally: Arc<RunStateTally>,
        handles: Vec<Arc<MotorHandle>>,
    ) -> Self {
        Self {
            alias,
            tally,
            handles,
            stop_reason: Mutex::new(None),
        }
    }

    /// Stop every motor; the first reason given wins
    fn stop(&self, reason: StopReason) {
        {
            let mut current = self.stop_reason.lock();
            if current.is_none() {
                tracing::info!(activity = %self.alias, reason = %reason, "Stopping activity");
                *current = Some(reason);
            }
        }
        for handle in &self.handles {
            handle.request_stop();
        }
    }
}

/// Controller handed to every op of the activity
///
/// The stop itself runs on a short-lived thread so the completing driver
/// thread is never held up.
pub(crate) struct FatalStop {
    shared: Arc<ActivityShared>,
}

impl FatalStop {
    pub(crate) fn new(shared: Arc<ActivityShared>) -> Self {
        Self { shared }
    }
}

impl ActivityController for FatalStop {
    fn stop_activity_with_error_async(&self, error: OpError) {
        let reason = StopReason::Fatal(error.to_string());
        let shared = Arc::clone(&self.shared);
        let for_thread = reason.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-stop", self.shared.alias))
            .spawn(move || shared.stop(for_thread));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Could not spawn stop thread, stopping inline");
            self.shared.stop(reason);
        }
    }
}

/// Cloneable handle that stops an activity from any thread
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<ActivityShared>,
}

impl StopHandle {
    /// Ask every motor of the activity to stop dispatching
    pub fn request_stop(&self) {
        self.shared.stop(StopReason::Requested);
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("activity", &self.shared.alias)
            .finish()
    }
}

/// Activity manages the motor lifecycle
///
/// Responsible for spawning motors, coordinating shutdown,
/// and collecting results.
pub struct Activity {
    /// Activity configuration
    pub(crate) config: ActivityConfig,

    /// Tally, motor handles and stop reason
    pub(crate) shared: Arc<ActivityShared>,

    /// Harness metrics shared by every motor
    pub(crate) metrics: Arc<ActivityMetrics>,

    /// Motors not yet spawned
    motors: Vec<Motor>,

    /// Running motor threads
    threads: Vec<JoinHandle<Result<MotorStats>>>,

    started_at: Option<Instant>,
}

impl Activity {
    /// Create a new activity from built motors
    ///
    /// Use `ActivityBuilder` for a more ergonomic construction.
    pub(crate) fn new(
        config: ActivityConfig,
        shared: Arc<ActivityShared>,
        metrics: Arc<ActivityMetrics>,
        motors: Vec<Motor>,
    ) -> Self {
        Self {
            config,
            shared,
            metrics,
            motors,
            threads: Vec::new(),
            started_at: None,
        }
    }

    /// Spawn one thread per motor
    ///
    /// # Errors
    /// Fails if the activity was already started or a thread cannot be
    /// spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.started_at.is_some() {
            return Err(Error::activity(format!(
                "activity '{}' was already started",
                self.config.alias
            )));
        }
        self.started_at = Some(Instant::now());

        tracing::info!(
            activity = %self.config.alias,
            threads = self.config.threads,
            stride = self.config.stride,
            cycles = %self.config.cycles,
            cyclerate = ?self.config.cyclerate.map(|r| r.ops_per_sec),
            striderate = ?self.config.striderate.map(|r| r.ops_per_sec),
            "Starting activity"
        );

        for motor in self.motors.drain(..) {
            let name = format!("{}:{}", self.config.alias, motor.slot());
            let handle = thread::Builder::new().name(name).spawn(move || motor.run())?;
            self.threads.push(handle);
        }
        Ok(())
    }

    /// Ask every motor to stop dispatching
    pub fn request_stop(&self) {
        self.shared.stop(StopReason::Requested);
    }

    /// Handle for stopping this activity from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait until no motor is still starting up
    pub fn await_running(&self, timeout: Duration) -> TallySnapshot {
        self.shared.tally.await_none_of(
            &[RunState::Uninitialized, RunState::Starting],
            timeout,
        )
    }

    /// Wait until every motor has settled
    pub fn await_completion(&self, timeout: Duration) -> TallySnapshot {
        self.shared.tally.await_none_of(&ACTIVE, timeout)
    }

    /// Join every motor thread and aggregate the results
    ///
    /// # Errors
    /// Fails if the activity was never started or every motor failed.
    pub fn join(&mut self) -> Result<ActivitySummary> {
        let Some(started_at) = self.started_at else {
            return Err(Error::activity(format!(
                "activity '{}' was never started",
                self.config.alias
            )));
        };

        let mut results = Vec::with_capacity(self.threads.len());
        let mut motor_failures = 0;
        for (slot, handle) in self.threads.drain(..).enumerate() {
            match handle.join() {
                Ok(Ok(stats)) => {
                    tracing::debug!(
                        motor = slot,
                        state = %stats.final_state,
                        cycles = stats.cycles_dispatched,
                        "Motor joined"
                    );
                    results.push(stats);
                }
                Ok(Err(e)) => {
                    motor_failures += 1;
                    tracing::error!(motor = slot, error = %e, "Motor returned error");
                }
                Err(_) => {
                    motor_failures += 1;
                    tracing::error!(motor = slot, "Motor thread panicked");
                }
            }
        }

        if results.is_empty() && motor_failures > 0 {
            return Err(Error::activity(format!(
                "All {} motors failed to complete",
                motor_failures
            )));
        }

        let summary = aggregate_motor_stats(
            &self.config.alias,
            &results,
            motor_failures,
            started_at.elapsed(),
            &self.metrics,
            self.stop_reason(),
        );
        tracing::info!(
            activity = %summary.alias,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            cycles = summary.cycles_dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cycles_per_second = summary.cycles_per_second,
            "Activity completed"
        );
        Ok(summary)
    }

    /// Start, then join
    pub fn run(mut self) -> Result<ActivitySummary> {
        self.start()?;
        self.join()
    }

    /// Start, stop after `timeout` if still active, then join
    pub fn run_with_timeout(mut self, timeout: Duration) -> Result<ActivitySummary> {
        self.start()?;
        if self.await_completion(timeout).timed_out {
            tracing::info!(activity = %self.config.alias, "Timeout reached, initiating shutdown...");
            self.request_stop();
        }
        self.join()
    }

    /// Run-state tally of this activity's motors
    pub fn tally(&self) -> &Arc<RunStateTally> {
        &self.shared.tally
    }

    /// Harness metrics
    pub fn metrics(&self) -> &Arc<ActivityMetrics> {
        &self.metrics
    }

    /// Why the activity was stopped, if it was
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.stop_reason.lock().clone()
    }

    /// Current state of each motor, by slot
    pub fn motor_states(&self) -> Vec<RunState> {
        self.shared.handles.iter().map(|h| h.state()).collect()
    }

    /// Get the activity configuration
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("alias", &self.config.alias)
            .field("threads", &self.config.threads)
            .field("tally", &self.shared.tally.snapshot().to_string())
            .finish()
    }
}
