//! Motor execution loop

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::input::Input;
use crate::metrics::ActivityMetrics;
use crate::ops::StrideTracker;
use crate::output::Output;
use crate::rate_limiter::RateLimiter;
use crate::state::RunState;

use super::dispatch::Dispatcher;
use super::handle::MotorHandle;
use super::stats::MotorStats;

/// Motor drives one thread's share of an activity:
/// **limit -> pull stride -> dispatch cycles -> repeat**
///
/// The run loop owns the thread it is called on. Other threads observe and
/// stop it through its [`MotorHandle`].
pub struct Motor {
    /// Slot within the activity
    slot: usize,

    /// Source of cycle segments (shared across motors via Arc)
    input: Arc<dyn Input>,

    /// Sync or async dispatch path, fixed at build time
    dispatcher: Box<dyn Dispatcher>,

    /// Stride consumer (shared across motors via Arc)
    output: Arc<dyn Output>,

    /// Cycles per stride
    stride: usize,

    /// Limiters shared by every motor of the activity
    stride_limiter: Option<Arc<dyn RateLimiter>>,
    cycle_limiter: Option<Arc<dyn RateLimiter>>,

    metrics: Arc<ActivityMetrics>,

    /// Upper bound on the final wait for in-flight ops
    drain_timeout: Duration,

    handle: Arc<MotorHandle>,
}

impl Motor {
    /// Create a new motor
    ///
    /// Use `MotorBuilder` for a more ergonomic construction.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        slot: usize,
        input: Arc<dyn Input>,
        dispatcher: Box<dyn Dispatcher>,
        output: Arc<dyn Output>,
        stride: usize,
        stride_limiter: Option<Arc<dyn RateLimiter>>,
        cycle_limiter: Option<Arc<dyn RateLimiter>>,
        metrics: Arc<ActivityMetrics>,
        drain_timeout: Duration,
        handle: Arc<MotorHandle>,
    ) -> Self {
        Self {
            slot,
            input,
            dispatcher,
            output,
            stride: stride.max(1),
            stride_limiter,
            cycle_limiter,
            metrics,
            drain_timeout,
            handle,
        }
    }

    /// Run until the input is exhausted, a stop is requested, or the loop fails
    ///
    /// Loop-level errors leave the motor `Errored` and are returned to the
    /// caller. Per-cycle failures never get here.
    pub fn run(mut self) -> Result<MotorStats> {
        let mut stats = MotorStats::new(self.slot);
        stats.start();
        tracing::debug!(motor = self.slot, "Motor started");

        let outcome = self.run_loop(&mut stats);
        stats.stop();

        match outcome {
            Ok(state) => {
                stats.final_state = state;
                tracing::debug!(
                    motor = self.slot,
                    state = %state,
                    strides = stats.strides,
                    cycles = stats.cycles_dispatched,
                    elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
                    "Motor finished"
                );
                Ok(stats)
            }
            Err(e) => {
                self.handle.fail();
                tracing::error!(motor = self.slot, error = %e, "Motor errored");
                Err(e)
            }
        }
    }

    fn run_loop(&mut self, stats: &mut MotorStats) -> Result<RunState> {
        self.handle.transition(RunState::Starting)?;

        if self.handle.enter_running()? {
            while self.handle.is_running() {
                if !self.run_stride(stats)? {
                    tracing::debug!(motor = self.slot, "Input exhausted");
                    break;
                }
            }
        }

        if !self.dispatcher.drain(self.drain_timeout) {
            tracing::warn!(
                motor = self.slot,
                pending = self.dispatcher.pending(),
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Timed out draining in-flight ops"
            );
        }

        self.handle.settle()
    }

    /// Pull and dispatch one stride; `false` once the input is exhausted
    fn run_stride(&mut self, stats: &mut MotorStats) -> Result<bool> {
        let stride_wait = wait_on(self.stride_limiter.as_deref(), &self.metrics.stride_ratelimit);

        let mut segment = match self.input.input_segment(self.stride) {
            Some(segment) if !segment.is_empty() => segment,
            _ => return Ok(false),
        };
        let first_cycle = segment.peek_next_cycle().unwrap_or_default();
        let size = segment.len();
        let stride = StrideTracker::new(
            first_cycle,
            size,
            stride_wait,
            Arc::clone(&self.output),
            Arc::clone(&self.metrics),
        );
        tracing::trace!(motor = self.slot, first_cycle, size, "Stride opened");

        let mut dispatched = 0;
        while let Some(cycle) = segment.next_cycle() {
            let cycle_wait = wait_on(self.cycle_limiter.as_deref(), &self.metrics.cycle_ratelimit);
            // A stop seen after the limiter wait still drops this cycle.
            if !self.handle.is_running() {
                break;
            }
            self.dispatcher
                .dispatch(cycle, stride_wait + cycle_wait, &stride)?;
            dispatched += 1;
        }

        if dispatched < size {
            stride.truncate(dispatched);
        }
        stats.record_stride(dispatched);
        Ok(true)
    }

    /// Get the motor slot
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Handle other threads use to observe and stop this motor
    pub fn handle(&self) -> &Arc<MotorHandle> {
        &self.handle
    }
}

fn wait_on(limiter: Option<&dyn RateLimiter>, timer: &crate::metrics::Timer) -> Duration {
    match limiter {
        Some(limiter) => {
            let waited = limiter.maybe_wait_for_op();
            timer.update(waited);
            waited
        }
        None => Duration::ZERO,
    }
}

impl std::fmt::Debug for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("slot", &self.slot)
            .field("state", &self.handle.state())
            .field("stride", &self.stride)
            .field("pending", &self.dispatcher.pending())
            .finish()
    }
}
