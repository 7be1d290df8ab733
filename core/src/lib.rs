//! cycle-bench-core: Execution harness for cycle-driven load generation
//!
//! This crate provides the machinery that turns a range of cycle numbers into
//! paced, bounded, observable work across many threads, including:
//!
//! - Motors: one OS thread each, pulling strides of cycles and dispatching them
//! - Activities: motor lifecycle, shared rate limiters, fatal-stop handling
//! - Run-state tracking with a cross-thread tally and await primitives
//! - Bounded in-flight op tracking with backpressure, retries and draining
//! - Metrics collection and aggregation
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod activity;
pub mod config;
pub mod error;
pub mod error_handler;
pub mod input;
pub mod metrics;
pub mod motor;
pub mod ops;
pub mod output;
pub mod rate_limiter;
pub mod state;

pub use action::{Action, ActionError, ActionKind, AsyncAction, Bind, SyncAction};
pub use activity::{
    aggregate_motor_stats, Activity, ActivityBuilder, ActivityController, ActivitySummary,
    StopHandle, StopReason,
};
pub use config::{ActivityConfig, ConfigError, CycleRange, RateSpec};
pub use error::{Error, Result};
pub use error_handler::{
    ErrorDetail, ErrorHandler, OpError, ResponseAction, VerbErrorHandler,
};
pub use input::{AtomicInput, CycleSegment, Input};
pub use metrics::*;
pub use motor::{Motor, MotorBuilder, MotorHandle, MotorStats};
pub use ops::{OpContext, OpPhase, OpTracker, StrideTracker, TrackedOp};
pub use output::{CycleResult, NullOutput, Output, ResultCollector, StrideResult};
pub use rate_limiter::{RateLimiter, TokenRateLimiter};
pub use state::{RunState, RunStateTally, TallySnapshot};
