//! Actions: what a motor does with each cycle
//!
//! An action is either synchronous, running every cycle to completion on the
//! motor thread, or asynchronous, handing a [`TrackedOp`] to an external
//! driver and completing it later from the driver's own threads. The choice
//! is made once when the [`Action`] is constructed; a motor never mixes the
//! two paths.

use std::sync::Arc;

use crate::error_handler::OpError;
use crate::motor::{AsyncDispatcher, DispatcherFactory, SyncDispatcher};
use crate::ops::TrackedOp;

/// Failure reported by an action entry point
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    /// Per-cycle failure, routed through the error handler
    #[error(transparent)]
    Op(#[from] OpError),

    /// Unrecoverable failure; the motor unwinds to `Errored`
    #[error("fatal action error: {0}")]
    Fatal(String),
}

impl ActionError {
    /// Fatal error from any displayable cause
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// Action that runs each cycle on the motor thread
///
/// One instance belongs to one motor, so it may keep per-thread state.
pub trait SyncAction: Send {
    /// Run `cycle` and return its result code
    fn run_cycle(&mut self, cycle: u64) -> Result<i32, ActionError>;
}

impl<F> SyncAction for F
where
    F: FnMut(u64) -> Result<i32, ActionError> + Send,
{
    fn run_cycle(&mut self, cycle: u64) -> Result<i32, ActionError> {
        self(cycle)
    }
}

/// Outcome of binding an async op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bind {
    /// Hand the op to the driver
    Ready,
    /// Filtered out; the op ends `Skipped` with this result code
    Skip(i32),
}

/// Action that hands ops to an external driver
///
/// The driver completes each op from its own threads by calling
/// [`TrackedOp::succeed`] or [`TrackedOp::fail`]. When `fail` hands the op
/// back, it has been re-armed for another attempt and should be resubmitted.
pub trait AsyncAction: Send + Sync + 'static {
    /// Per-op payload owned by the tracked op
    type Op: Send + 'static;

    /// Build the payload for `cycle`
    fn op_init(&self, cycle: u64) -> Self::Op;

    /// Bind, filter or transform the op before execution
    fn bind(&self, _op: &mut TrackedOp<Self::Op>) -> Result<Bind, ActionError> {
        Ok(Bind::Ready)
    }

    /// Submit a started op to the driver without waiting for its result
    fn execute(&self, op: TrackedOp<Self::Op>);
}

/// Which dispatch path an action takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Cycles run on the motor thread
    Synchronous,
    /// Cycles complete on driver threads
    Asynchronous,
}

/// A motor's action, with its dispatch path fixed at construction
pub struct Action {
    kind: ActionKind,
    pub(crate) factory: Box<dyn DispatcherFactory>,
}

impl Action {
    /// Wrap a synchronous action
    pub fn sync<A: SyncAction + 'static>(action: A) -> Self {
        Self {
            kind: ActionKind::Synchronous,
            factory: Box::new(SyncDispatcher::factory(Box::new(action))),
        }
    }

    /// Wrap a closure as a synchronous action
    pub fn sync_fn<F>(f: F) -> Self
    where
        F: FnMut(u64) -> Result<i32, ActionError> + Send + 'static,
    {
        Self::sync(f)
    }

    /// Wrap an asynchronous action
    pub fn asynchronous<A: AsyncAction>(action: A) -> Self {
        Self::shared(Arc::new(action))
    }

    /// Wrap an asynchronous action that is already shared
    pub fn shared<A: AsyncAction>(action: Arc<A>) -> Self {
        Self {
            kind: ActionKind::Asynchronous,
            factory: Box::new(AsyncDispatcher::factory(action)),
        }
    }

    /// Dispatch path of this action
    pub fn kind(&self) -> ActionKind {
        self.kind
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("kind", &self.kind).finish()
    }
}
