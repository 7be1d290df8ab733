//! Per-cycle dispatch strategies
//!
//! A motor picks its strategy once, when it is built, from the kind of its
//! [`Action`](crate::Action). The run loop only ever talks to the
//! [`Dispatcher`] trait.

use std::sync::Arc;
use std::time::Duration;

use crate::action::{ActionError, AsyncAction, Bind, SyncAction};
use crate::error::{Error, Result};
use crate::metrics::ActivityMetrics;
use crate::ops::{OpContext, OpTracker, StrideTracker, TrackedOp};

/// Tracker sizing for one motor
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackerSettings {
    pub slot: usize,
    pub max_pending: usize,
    pub slice: Duration,
}

/// Turns an action into the dispatcher a motor runs
pub(crate) trait DispatcherFactory: Send {
    fn build(self: Box<Self>, settings: TrackerSettings, ctx: OpContext) -> Box<dyn Dispatcher>;
}

/// Hands one cycle at a time to an action
pub(crate) trait Dispatcher: Send {
    /// Queue, run or submit `cycle` as part of `stride`
    ///
    /// `wait_time` is the rate-limiter delay charged to the cycle. Only
    /// loop-level failures come back as `Err`.
    fn dispatch(
        &mut self,
        cycle: u64,
        wait_time: Duration,
        stride: &Arc<StrideTracker>,
    ) -> Result<()>;

    /// Ops not yet terminal
    fn pending(&self) -> usize;

    /// Wait for in-flight ops; `false` if `timeout` elapsed first
    fn drain(&self, timeout: Duration) -> bool;
}

/// Runs each cycle to completion on the motor thread, retrying in place
pub(crate) struct SyncDispatcher {
    action: Box<dyn SyncAction>,
    tracker: OpTracker<()>,
}

impl SyncDispatcher {
    pub(crate) fn factory(action: Box<dyn SyncAction>) -> SyncFactory {
        SyncFactory(action)
    }
}

pub(crate) struct SyncFactory(Box<dyn SyncAction>);

impl DispatcherFactory for SyncFactory {
    fn build(self: Box<Self>, settings: TrackerSettings, ctx: OpContext) -> Box<dyn Dispatcher> {
        Box::new(SyncDispatcher {
            action: self.0,
            tracker: OpTracker::new(
                settings.slot,
                settings.max_pending,
                settings.slice,
                ctx,
                |_| (),
            ),
        })
    }
}

impl Dispatcher for SyncDispatcher {
    fn dispatch(
        &mut self,
        cycle: u64,
        wait_time: Duration,
        stride: &Arc<StrideTracker>,
    ) -> Result<()> {
        let mut op = self.tracker.new_op(cycle, stride);
        op.set_wait_time(wait_time);
        op.start()?;
        loop {
            match self.action.run_cycle(cycle) {
                Ok(code) => return op.succeed(code),
                Err(ActionError::Op(error)) => match op.fail(error) {
                    Some(retry) => op = retry,
                    None => return Ok(()),
                },
                Err(ActionError::Fatal(message)) => {
                    return Err(Error::Action { cycle, message });
                }
            }
        }
    }

    fn pending(&self) -> usize {
        self.tracker.pending()
    }

    fn drain(&self, _timeout: Duration) -> bool {
        // Every cycle is terminal before dispatch returns.
        true
    }
}

/// Binds ops on the motor thread and submits them to the driver
pub(crate) struct AsyncDispatcher<A: AsyncAction> {
    action: Arc<A>,
    tracker: OpTracker<A::Op>,
    metrics: Arc<ActivityMetrics>,
}

impl<A: AsyncAction> AsyncDispatcher<A> {
    pub(crate) fn factory(action: Arc<A>) -> AsyncFactory<A> {
        AsyncFactory(action)
    }
}

pub(crate) struct AsyncFactory<A>(Arc<A>);

impl<A: AsyncAction> DispatcherFactory for AsyncFactory<A> {
    fn build(self: Box<Self>, settings: TrackerSettings, ctx: OpContext) -> Box<dyn Dispatcher> {
        let metrics = Arc::clone(ctx.metrics());
        let init = Arc::clone(&self.0);
        Box::new(AsyncDispatcher {
            action: self.0,
            tracker: OpTracker::new(
                settings.slot,
                settings.max_pending,
                settings.slice,
                ctx,
                move |cycle| init.op_init(cycle),
            ),
            metrics,
        })
    }
}

impl<A: AsyncAction> AsyncDispatcher<A> {
    /// Bind, then skip or start and hand the op to the driver
    fn enqueue(&self, mut op: TrackedOp<A::Op>) -> Result<()> {
        let cycle = op.cycle();
        let bind = self.metrics.bind.time();
        let bound = self.action.bind(&mut op);
        bind.stop();

        match bound {
            Ok(Bind::Ready) => {
                op.start()?;
                let execute = self.metrics.execute.time();
                self.action.execute(op);
                execute.stop();
                Ok(())
            }
            Ok(Bind::Skip(code)) => op.skip(code),
            Err(ActionError::Op(error)) => {
                // Still queued, so this completes the op rather than re-arming it.
                let _ = op.fail(error);
                Ok(())
            }
            Err(ActionError::Fatal(message)) => Err(Error::Action { cycle, message }),
        }
    }
}

impl<A: AsyncAction> Dispatcher for AsyncDispatcher<A> {
    fn dispatch(
        &mut self,
        cycle: u64,
        wait_time: Duration,
        stride: &Arc<StrideTracker>,
    ) -> Result<()> {
        let mut op = self.tracker.new_op(cycle, stride);
        op.set_wait_time(wait_time);
        self.enqueue(op)
    }

    fn pending(&self) -> usize {
        self.tracker.pending()
    }

    fn drain(&self, timeout: Duration) -> bool {
        self.tracker.await_completion(timeout)
    }
}
