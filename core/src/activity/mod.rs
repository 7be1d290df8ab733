//! Activity: lifecycle of a group of motors
//!
//! The Activity coordinates one complete run:
//! - Building one motor per configured thread, all sharing one input, one
//!   pair of rate limiters and one run-state tally
//! - Spawning a named OS thread per motor
//! - Stopping every motor on request or when an op fails fatally
//! - Joining the motors and aggregating their statistics
//!
//! # Example
//!
//! ```ignore
//! use cycle_bench_core::{Action, ActivityBuilder, ActivityConfig};
//!
//! let activity = ActivityBuilder::new()
//!     .config(ActivityConfig::new("writes").with_threads(4).with_stride(10))
//!     .action(|_slot| Action::sync_fn(|_cycle| Ok(0)))
//!     .build()?;
//!
//! let summary = activity.run()?;
//! ```

mod aggregator;
mod builder;
mod executor;

pub use aggregator::{aggregate_motor_stats, ActivitySummary};
pub use builder::ActivityBuilder;
pub use executor::{Activity, StopHandle};

use serde::{Deserialize, Serialize};

use crate::error_handler::OpError;

/// Receives activity-wide stop requests raised by failing ops
///
/// Called from whichever thread completes the op, so implementations must
/// return promptly and never block on the motors themselves.
pub trait ActivityController: Send + Sync {
    /// Stop the whole activity because of `error`, without waiting for it
    fn stop_activity_with_error_async(&self, error: OpError);
}

/// Why an activity stopped before exhausting its input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `request_stop` was called
    Requested,
    /// An op failure was classified as fatal
    Fatal(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::Fatal(message) => write!(f, "fatal error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests;
