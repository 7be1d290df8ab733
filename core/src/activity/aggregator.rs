//! Result aggregation from multiple motors

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::{ActivityMetrics, MetricsSnapshot};
use crate::motor::MotorStats;

use super::StopReason;

/// Aggregated outcome of one activity run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Activity alias
    pub alias: String,

    /// Motors that settled without error
    pub motors: usize,

    /// Motors that ended `Errored` or panicked
    pub errored_motors: usize,

    /// Strides opened across all motors
    pub strides: usize,

    /// Cycles handed to the action across all motors
    pub cycles_dispatched: u64,

    /// Ops that ended `Succeeded`
    pub succeeded: u64,

    /// Ops that ended `Failed`
    pub failed: u64,

    /// Ops that ended `Skipped`
    pub skipped: u64,

    /// Retries scheduled
    pub retries: u64,

    /// Wall-clock time from start to join
    pub elapsed: Duration,

    /// Overall dispatch rate
    pub cycles_per_second: f64,

    /// Why the activity stopped early, if it did
    pub stop_reason: Option<StopReason>,

    /// Every registered timer, histogram and counter
    pub metrics: MetricsSnapshot,
}

impl ActivitySummary {
    /// Ops that reached a terminal phase
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    /// Share of terminal ops that failed (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.completed();
        if total > 0 {
            self.failed as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Aggregate statistics from multiple motors
pub fn aggregate_motor_stats(
    alias: &str,
    stats: &[MotorStats],
    errored_motors: usize,
    elapsed: Duration,
    metrics: &ActivityMetrics,
    stop_reason: Option<StopReason>,
) -> ActivitySummary {
    let strides: usize = stats.iter().map(|s| s.strides).sum();
    let cycles_dispatched: u64 = stats.iter().map(|s| s.cycles_dispatched).sum();

    let secs = elapsed.as_secs_f64();
    let cycles_per_second = if secs > 0.0 {
        cycles_dispatched as f64 / secs
    } else {
        0.0
    };

    ActivitySummary {
        alias: alias.to_string(),
        motors: stats.len(),
        errored_motors,
        strides,
        cycles_dispatched,
        succeeded: metrics.succeeded.count(),
        failed: metrics.failed.count(),
        skipped: metrics.skipped.count(),
        retries: metrics.retries.count(),
        elapsed,
        cycles_per_second,
        stop_reason,
        metrics: metrics.registry().snapshot(),
    }
}
