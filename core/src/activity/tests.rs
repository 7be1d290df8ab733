//! Integration tests for the Activity module

use super::*;
use crate::action::{Action, ActionError, AsyncAction};
use crate::config::{ActivityConfig, CycleRange, RateSpec};
use crate::error::Error;
use crate::metrics::MetricsRegistry;
use crate::ops::TrackedOp;
use crate::output::ResultCollector;
use crate::state::RunState;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn noop(_slot: usize) -> Action {
    Action::sync_fn(|_cycle| Ok(0))
}

fn slow(_slot: usize) -> Action {
    Action::sync_fn(|_cycle| {
        thread::sleep(Duration::from_millis(1));
        Ok(0)
    })
}

/// Async driver completing ops on short-lived threads
struct SpawningDriver {
    fail_cycle: Option<u64>,
}

impl AsyncAction for SpawningDriver {
    type Op = ();

    fn op_init(&self, _cycle: u64) {}

    fn execute(&self, op: TrackedOp<()>) {
        let fail_cycle = self.fail_cycle;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            if Some(op.cycle()) == fail_cycle {
                let cycle = op.cycle();
                assert!(op.fail(OpError::NotApplied { cycle }).is_none());
            } else {
                op.succeed(0).unwrap();
            }
        });
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_threads_share_input_without_overlap() {
    let collector = Arc::new(ResultCollector::new());
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("share")
                .with_threads(4)
                .with_stride(10)
                .with_cycles(CycleRange::new(0, 1000)),
        )
        .output(collector.clone())
        .action(noop)
        .build()
        .unwrap();
    let tally = Arc::clone(activity.tally());

    let summary = activity.run().unwrap();

    assert_eq!(summary.motors, 4);
    assert_eq!(summary.errored_motors, 0);
    assert_eq!(summary.cycles_dispatched, 1000);
    assert_eq!(summary.strides, 100);
    assert_eq!(summary.succeeded, 1000);
    assert!(summary.stop_reason.is_none());
    assert_eq!(tally.snapshot().count(RunState::Finished), 4);

    let results = collector.cycle_results();
    let unique: HashSet<u64> = results.iter().map(|r| r.cycle).collect();
    assert_eq!(results.len(), 1000);
    assert_eq!(unique.len(), 1000);
}

#[test]
fn test_request_stop_stops_every_motor() {
    let mut activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("stop")
                .with_threads(3)
                .with_stride(5)
                .with_cycles(CycleRange::new(0, 1_000_000)),
        )
        .action(slow)
        .build()
        .unwrap();

    activity.start().unwrap();
    let running = activity.await_running(Duration::from_secs(5));
    assert!(!running.timed_out);
    thread::sleep(Duration::from_millis(20));

    activity.request_stop();
    let done = activity.await_completion(Duration::from_secs(5));
    assert!(!done.timed_out);
    assert_eq!(done.count(RunState::Stopped), 3);

    let summary = activity.join().unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
    assert!(summary.cycles_dispatched < 1_000_000);
}

#[test]
fn test_stop_handle_from_another_thread() {
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("remote")
                .with_threads(2)
                .with_cycles(CycleRange::new(0, 1_000_000)),
        )
        .action(slow)
        .build()
        .unwrap();
    let stopper = activity.stop_handle();
    let tally = Arc::clone(activity.tally());

    let remote = thread::spawn(move || {
        let running = tally.await_any(&[RunState::Running], Duration::from_secs(5));
        assert!(!running.timed_out);
        stopper.request_stop();
    });

    let summary = activity.run().unwrap();
    remote.join().unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
}

#[test]
fn test_await_none_other_running() {
    let mut activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("await")
                .with_threads(2)
                .with_cycles(CycleRange::new(0, 1_000_000)),
        )
        .action(slow)
        .build()
        .unwrap();

    // Nothing started: every motor is still Uninitialized.
    let before = activity
        .tally()
        .await_none_other(&[RunState::Running], Duration::from_millis(20));
    assert!(before.timed_out);

    activity.start().unwrap();
    let all_running = activity
        .tally()
        .await_none_other(&[RunState::Running], Duration::from_secs(5));
    assert!(!all_running.timed_out);
    assert_eq!(all_running.count(RunState::Running), 2);

    activity.request_stop();
    activity.join().unwrap();
}

#[test]
fn test_run_with_timeout_stops_long_activity() {
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("timeout")
                .with_threads(2)
                .with_cycles(CycleRange::new(0, 1_000_000)),
        )
        .action(slow)
        .build()
        .unwrap();

    let summary = activity
        .run_with_timeout(Duration::from_millis(50))
        .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
    assert_eq!(summary.motors, 2);
    assert!(summary.cycles_dispatched > 0);
}

#[test]
fn test_run_with_timeout_on_short_activity() {
    let activity = ActivityBuilder::new()
        .config(ActivityConfig::new("short").with_cycles(CycleRange::new(0, 10)))
        .action(noop)
        .build()
        .unwrap();

    let summary = activity.run_with_timeout(Duration::from_secs(5)).unwrap();
    assert!(summary.stop_reason.is_none());
    assert_eq!(summary.cycles_dispatched, 10);
}

#[test]
fn test_start_twice_and_join_unstarted() {
    let mut activity = ActivityBuilder::new().action(noop).build().unwrap();
    assert!(matches!(activity.join(), Err(Error::Activity(_))));

    activity.start().unwrap();
    assert!(matches!(activity.start(), Err(Error::Activity(_))));
    activity.join().unwrap();
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_fatal_op_stops_activity() {
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("fatal")
                .with_threads(2)
                .with_stride(10)
                .with_max_pending(8)
                .with_cycles(CycleRange::new(0, 1_000_000))
                .with_errors("NotApplied=stop;*=retry"),
        )
        .async_action(Arc::new(SpawningDriver {
            fail_cycle: Some(25),
        }))
        .build()
        .unwrap();

    let summary = activity.run().unwrap();

    assert!(matches!(summary.stop_reason, Some(StopReason::Fatal(ref m)) if m.contains("25")));
    assert!(summary.cycles_dispatched < 1_000_000);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        summary.succeeded + summary.failed,
        summary.cycles_dispatched
    );
}

#[test]
fn test_every_motor_failing_is_an_error() {
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("broken")
                .with_threads(2)
                .with_cycles(CycleRange::new(0, 100)),
        )
        .action(|_| Action::sync_fn(|_| Err(ActionError::fatal("no session"))))
        .build()
        .unwrap();
    let tally = Arc::clone(activity.tally());

    let err = activity.run().unwrap_err();
    assert!(err.to_string().contains("2 motors failed"));
    assert_eq!(tally.snapshot().count(RunState::Errored), 2);
}

#[test]
fn test_error_counts_land_in_registry() {
    let registry = Arc::new(MetricsRegistry::new());
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("counted")
                .with_cycles(CycleRange::new(0, 6))
                .with_errors("count"),
        )
        .registry(Arc::clone(&registry))
        .action(|_| {
            Action::sync_fn(|cycle| {
                if cycle % 2 == 0 {
                    Err(OpError::driver("Syntax", "bad").into())
                } else {
                    Ok(0)
                }
            })
        })
        .build()
        .unwrap();

    let summary = activity.run().unwrap();

    assert_eq!(registry.counter("errors.Syntax").count(), 3);
    assert_eq!(summary.metrics.counter("errors.Syntax"), 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.succeeded, 3);
}

#[test]
fn test_stride_rate_limiter_is_consulted() {
    let activity = ActivityBuilder::new()
        .config(
            ActivityConfig::new("paced")
                .with_cycles(CycleRange::new(0, 10))
                .with_striderate(RateSpec::new(500.0)),
        )
        .action(noop)
        .build()
        .unwrap();
    let metrics = Arc::clone(activity.metrics());

    activity.run().unwrap();

    // One wait per stride plus the one before input ran dry.
    assert_eq!(metrics.stride_ratelimit.count(), 11);
}
