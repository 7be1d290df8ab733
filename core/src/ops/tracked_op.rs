//! State of one cycle's operation

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::op_tracker::TrackerShared;
use super::StrideTracker;
use crate::error::{Error, Result};
use crate::error_handler::OpError;

/// Phase of a tracked op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpPhase {
    /// Created, holding a tracker slot, not yet handed to the driver
    Queued,
    /// Handed to the driver (possibly on a retry)
    Started,
    /// Completed successfully
    Succeeded,
    /// Completed with a failure that will not be retried
    Failed,
    /// Rejected by a filter before execution
    Skipped,
}

impl OpPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, OpPhase::Succeeded | OpPhase::Failed | OpPhase::Skipped)
    }
}

/// One cycle's operation, from queueing to its terminal phase
///
/// The op moves by value: motor thread, action, driver, completion callback.
/// Terminal transitions consume it, record timers, report the cycle to its
/// stride and hand the tracker slot back. An op dropped before it reaches a
/// terminal phase is completed as failed with result code `-1`.
pub struct TrackedOp<D> {
    cycle: u64,
    payload: D,
    phase: OpPhase,
    tries: u32,
    wait_time: Duration,
    queued_at: Instant,
    started_at: Option<Instant>,
    tracker: Arc<TrackerShared>,
    stride: Arc<StrideTracker>,
}

impl<D> TrackedOp<D> {
    pub(crate) fn new(
        cycle: u64,
        payload: D,
        tracker: Arc<TrackerShared>,
        stride: Arc<StrideTracker>,
    ) -> Self {
        Self {
            cycle,
            payload,
            phase: OpPhase::Queued,
            tries: 0,
            wait_time: Duration::ZERO,
            queued_at: Instant::now(),
            started_at: None,
            tracker,
            stride,
        }
    }

    /// Cycle this op belongs to
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Driver payload
    pub fn payload(&self) -> &D {
        &self.payload
    }

    /// Driver payload, mutably (binding happens here)
    pub fn payload_mut(&mut self) -> &mut D {
        &mut self.payload
    }

    /// Current phase
    pub fn phase(&self) -> OpPhase {
        self.phase
    }

    /// Attempts made so far
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Retries made so far
    pub fn retries(&self) -> u32 {
        self.tries.saturating_sub(1)
    }

    /// Scheduling delay imposed by the cycle rate limiter
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Record the scheduling delay for response-time correction
    pub fn set_wait_time(&mut self, wait_time: Duration) {
        self.wait_time = wait_time;
    }

    /// Time since the op was queued
    pub fn age(&self) -> Duration {
        self.queued_at.elapsed()
    }

    /// Time since the current attempt started
    pub fn service_time(&self) -> Option<Duration> {
        self.started_at.map(|s| s.elapsed())
    }

    /// `Queued -> Started`, first attempt
    pub fn start(&mut self) -> Result<()> {
        self.expect_phase(OpPhase::Queued, OpPhase::Started)?;
        self.begin_attempt();
        Ok(())
    }

    /// Re-arm a started op in place for another attempt
    ///
    /// Cycle and try count carry over; timing restarts.
    pub fn retry(&mut self) -> Result<()> {
        self.expect_phase(OpPhase::Started, OpPhase::Started)?;
        self.tracker.ctx.metrics.retries.increment();
        self.begin_attempt();
        Ok(())
    }

    /// `Started -> Succeeded`
    pub fn succeed(mut self, result_code: i32) -> Result<()> {
        self.expect_phase(OpPhase::Started, OpPhase::Succeeded)?;
        self.complete(OpPhase::Succeeded, result_code);
        Ok(())
    }

    /// `Queued -> Skipped`: rejected before execution, no timers recorded
    pub fn skip(mut self, result_code: i32) -> Result<()> {
        self.expect_phase(OpPhase::Queued, OpPhase::Skipped)?;
        self.complete(OpPhase::Skipped, result_code);
        Ok(())
    }

    /// Report a failure of the current attempt
    ///
    /// The error handler classifies it. If it is retryable and the try budget
    /// allows, the op is re-armed and handed back for resubmission. Otherwise
    /// it ends `Failed`; a stop classification additionally asks the activity
    /// controller to stop the whole activity.
    pub fn fail(mut self, error: OpError) -> Option<Self> {
        let ctx = self.tracker.ctx.clone();
        let detail = ctx.error_handler.classify(self.cycle, &error);

        if detail.retryable && self.phase == OpPhase::Started && self.tries < ctx.max_tries {
            tracing::debug!(cycle = self.cycle, tries = self.tries, error = %error, "retrying op");
            // Started -> Started never fails.
            let _ = self.retry();
            return Some(self);
        }

        if detail.result_code == 0 {
            // Reported as success, but kept out of `result_success`.
            self.tracker.ctx.metrics.ignored.increment();
            self.record(OpPhase::Succeeded, 0, false);
        } else {
            self.complete(OpPhase::Failed, detail.result_code);
        }
        if detail.is_stop() {
            tracing::error!(cycle = self.cycle, error = %error, "fatal op outcome, stopping activity");
            ctx.controller.stop_activity_with_error_async(error);
        }
        None
    }

    fn expect_phase(&self, from: OpPhase, to: OpPhase) -> Result<()> {
        if self.phase == from {
            Ok(())
        } else {
            Err(Error::IllegalOpTransition {
                cycle: self.cycle,
                from: self.phase,
                to,
            })
        }
    }

    fn begin_attempt(&mut self) {
        self.phase = OpPhase::Started;
        self.tries += 1;
        self.started_at = Some(Instant::now());
        self.tracker.ctx.metrics.attempts.increment();
    }

    fn complete(&mut self, phase: OpPhase, result_code: i32) {
        self.record(phase, result_code, phase == OpPhase::Succeeded);
    }

    fn record(&mut self, phase: OpPhase, result_code: i32, success_sample: bool) {
        let metrics = &self.tracker.ctx.metrics;
        self.phase = phase;

        if phase == OpPhase::Skipped {
            metrics.skipped.increment();
        } else {
            let service = self.started_at.map(|s| s.elapsed()).unwrap_or_default();
            metrics.result.update(service);
            metrics.cycle_service.update(service);
            metrics.cycle_response.update(service + self.wait_time);
            metrics.tries.update(u64::from(self.tries));
            if success_sample {
                metrics.result_success.update(service);
            }
            if phase == OpPhase::Succeeded {
                metrics.succeeded.increment();
            } else {
                metrics.failed.increment();
            }
        }

        self.stride.on_cycle_result(self.cycle, result_code);
        self.tracker.release();
    }
}

impl<D> Drop for TrackedOp<D> {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            tracing::warn!(
                cycle = self.cycle,
                phase = ?self.phase,
                error = %OpError::Abandoned,
                "op dropped before completion"
            );
            self.complete(OpPhase::Failed, -1);
        }
    }
}

impl<D> std::fmt::Debug for TrackedOp<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedOp")
            .field("cycle", &self.cycle)
            .field("phase", &self.phase)
            .field("tries", &self.tries)
            .field("wait_time", &self.wait_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityController;
    use crate::error_handler::VerbErrorHandler;
    use crate::metrics::ActivityMetrics;
    use crate::ops::{OpContext, OpTracker};
    use crate::output::ResultCollector;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingController {
        stops: Mutex<Vec<OpError>>,
    }

    impl ActivityController for RecordingController {
        fn stop_activity_with_error_async(&self, error: OpError) {
            self.stops.lock().push(error);
        }
    }

    struct Fixture {
        tracker: OpTracker<()>,
        metrics: Arc<ActivityMetrics>,
        controller: Arc<RecordingController>,
        collector: Arc<ResultCollector>,
    }

    impl Fixture {
        fn new(errors: &str, max_tries: u32) -> Self {
            let metrics = Arc::new(ActivityMetrics::detached());
            let controller = Arc::new(RecordingController::default());
            let ctx = OpContext::new(
                Arc::clone(&metrics),
                Arc::new(VerbErrorHandler::parse(errors).unwrap()),
                controller.clone(),
                max_tries,
            );
            Self {
                tracker: OpTracker::new(0, 16, Duration::from_secs(1), ctx, |_| ()),
                metrics,
                controller,
                collector: Arc::new(ResultCollector::new()),
            }
        }

        fn stride(&self, size: usize) -> Arc<StrideTracker> {
            StrideTracker::new(
                0,
                size,
                Duration::ZERO,
                self.collector.clone(),
                Arc::clone(&self.metrics),
            )
        }
    }

    #[test]
    fn test_happy_path() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(0, &stride);
        assert_eq!(op.phase(), OpPhase::Queued);

        op.set_wait_time(Duration::from_millis(2));
        op.start().unwrap();
        assert_eq!(op.phase(), OpPhase::Started);
        assert_eq!(op.tries(), 1);
        op.succeed(0).unwrap();

        assert_eq!(fx.metrics.succeeded.count(), 1);
        assert_eq!(fx.metrics.result_success.count(), 1);
        assert_eq!(fx.metrics.tries.count_at(1), 1);
        assert_eq!(fx.tracker.pending(), 0);
        assert_eq!(fx.collector.cycle_results()[0].result_code, 0);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(0, &stride);
        op.start().unwrap();
        assert!(matches!(
            op.start(),
            Err(Error::IllegalOpTransition {
                from: OpPhase::Started,
                ..
            })
        ));
        op.succeed(0).unwrap();
    }

    #[test]
    fn test_succeed_before_start_is_rejected() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        let op = fx.tracker.new_op(0, &stride);
        assert!(op.succeed(0).is_err());
        // The rejected op was dropped and settled as failed.
        assert_eq!(fx.tracker.pending(), 0);
        assert_eq!(fx.metrics.failed.count(), 1);
    }

    #[test]
    fn test_retried_k_times_then_succeeds() {
        let fx = Fixture::new("retry", 5);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(3, &stride);
        op.start().unwrap();

        for _ in 0..2 {
            op = op
                .fail(OpError::driver("Overloaded", "busy"))
                .expect("retry budget remains");
            assert_eq!(op.phase(), OpPhase::Started);
            assert_eq!(op.cycle(), 3);
        }
        assert_eq!(op.retries(), 2);
        op.succeed(0).unwrap();

        assert_eq!(fx.metrics.attempts.count(), 3);
        assert_eq!(fx.metrics.retries.count(), 2);
        assert_eq!(fx.metrics.tries.count(), 1);
        assert_eq!(fx.metrics.tries.count_at(3), 1);
        assert_eq!(fx.metrics.succeeded.count(), 1);
        assert_eq!(fx.metrics.failed.count(), 0);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(0, &stride);
        op.start().unwrap();

        let mut attempts = 1;
        while let Some(next) = op.fail(OpError::Timeout(Duration::from_millis(1))) {
            op = next;
            attempts += 1;
            assert!(attempts <= 3);
        }
        assert_eq!(attempts, 3);
        assert_eq!(fx.metrics.failed.count(), 1);
        assert_eq!(fx.collector.cycle_results()[0].result_code, 1);
        assert!(fx.controller.stops.lock().is_empty());
    }

    #[test]
    fn test_stop_classification_notifies_controller() {
        let fx = Fixture::new("NotApplied=stop,9;*=retry", 3);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(4, &stride);
        op.start().unwrap();

        assert!(op.fail(OpError::NotApplied { cycle: 4 }).is_none());
        let stops = fx.controller.stops.lock();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0], OpError::NotApplied { cycle: 4 });
        assert_eq!(fx.collector.cycle_results()[0].result_code, 9);
    }

    #[test]
    fn test_ignored_failure_keeps_result_success_gap() {
        let fx = Fixture::new("ignore", 3);
        let stride = fx.stride(1);
        let mut op = fx.tracker.new_op(0, &stride);
        op.start().unwrap();

        assert!(op.fail(OpError::driver("Syntax", "bad")).is_none());
        assert_eq!(fx.metrics.succeeded.count(), 1);
        assert_eq!(fx.metrics.ignored.count(), 1);
        assert_eq!(fx.metrics.result.count(), 1);
        assert_eq!(fx.metrics.result_success.count(), 0);
        assert_eq!(fx.collector.cycle_results()[0].result_code, 0);
    }

    #[test]
    fn test_skip_bypasses_timers_but_completes_stride() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(2);
        let skipped = fx.tracker.new_op(0, &stride);
        skipped.skip(7).unwrap();
        let mut done = fx.tracker.new_op(1, &stride);
        done.start().unwrap();
        done.succeed(0).unwrap();

        assert!(stride.is_complete());
        assert_eq!(fx.metrics.skipped.count(), 1);
        assert_eq!(fx.metrics.result.count(), 1);
        assert_eq!(fx.collector.result_code_counts()[&7], 1);
    }

    #[test]
    fn test_failure_on_queued_op_does_not_retry() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        let op = fx.tracker.new_op(0, &stride);
        assert!(op.fail(OpError::driver("Bind", "no such field")).is_none());
        assert_eq!(fx.metrics.failed.count(), 1);
    }

    #[test]
    fn test_dropped_op_settles_as_abandoned() {
        let fx = Fixture::new("retry", 3);
        let stride = fx.stride(1);
        {
            let mut op = fx.tracker.new_op(0, &stride);
            op.start().unwrap();
        }
        assert_eq!(fx.tracker.pending(), 0);
        assert_eq!(fx.collector.cycle_results()[0].result_code, -1);
    }
}
