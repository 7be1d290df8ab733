//! In-flight operation tracking
//!
//! A [`TrackedOp`] carries one cycle from queueing to a terminal phase. Its
//! owning [`OpTracker`] bounds how many ops a motor may have outstanding, and
//! the [`StrideTracker`] shared by every op of a stride turns their
//! completions into one [`crate::StrideResult`].

mod op_tracker;
mod stride_tracker;
mod tracked_op;

pub use op_tracker::{OpContext, OpTracker};
pub use stride_tracker::StrideTracker;
pub use tracked_op::{OpPhase, TrackedOp};
