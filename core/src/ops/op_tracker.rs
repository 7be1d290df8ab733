//! Bounded registry of in-flight ops for one motor

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{StrideTracker, TrackedOp};
use crate::activity::ActivityController;
use crate::error_handler::ErrorHandler;
use crate::metrics::ActivityMetrics;

/// Everything a terminal op needs to report itself
///
/// Shared by every op of a tracker and used from driver threads.
#[derive(Clone)]
pub struct OpContext {
    pub(crate) metrics: Arc<ActivityMetrics>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) controller: Arc<dyn ActivityController>,
    pub(crate) max_tries: u32,
}

impl OpContext {
    /// Bundle the completion collaborators
    pub fn new(
        metrics: Arc<ActivityMetrics>,
        error_handler: Arc<dyn ErrorHandler>,
        controller: Arc<dyn ActivityController>,
        max_tries: u32,
    ) -> Self {
        Self {
            metrics,
            error_handler,
            controller,
            max_tries: max_tries.max(1),
        }
    }

    /// Metrics ops record into
    pub fn metrics(&self) -> &Arc<ActivityMetrics> {
        &self.metrics
    }
}

pub(crate) struct TrackerShared {
    slot: usize,
    max_pending: usize,
    slice: Duration,
    pending: Mutex<usize>,
    freed: Condvar,
    pub(crate) ctx: OpContext,
}

impl TrackerShared {
    /// Give back one slot and wake anyone blocked on capacity or drain
    pub(crate) fn release(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        self.freed.notify_all();
    }
}

/// Per-motor bound on outstanding async ops
///
/// The live count only grows inside [`OpTracker::new_op`], under the tracker
/// lock and after waiting for room, so it can never exceed `max_pending`.
/// Terminal ops give their slot back from whichever thread completes them.
pub struct OpTracker<D> {
    shared: Arc<TrackerShared>,
    op_init: Box<dyn Fn(u64) -> D + Send + Sync>,
    _payload: PhantomData<fn() -> D>,
}

impl<D> OpTracker<D> {
    /// Create a tracker for motor `slot`
    ///
    /// `op_init` builds the driver payload for each new op. `slice` bounds a
    /// single backpressure wait so a blocked motor still reports periodically.
    pub fn new<F>(
        slot: usize,
        max_pending: usize,
        slice: Duration,
        ctx: OpContext,
        op_init: F,
    ) -> Self
    where
        F: Fn(u64) -> D + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(TrackerShared {
                slot,
                max_pending: max_pending.max(1),
                slice,
                pending: Mutex::new(0),
                freed: Condvar::new(),
                ctx,
            }),
            op_init: Box::new(op_init),
            _payload: PhantomData,
        }
    }

    /// Queue a new op for `cycle`, blocking while the tracker is full
    pub fn new_op(&self, cycle: u64, stride: &Arc<StrideTracker>) -> TrackedOp<D> {
        self.acquire_slot(cycle);
        TrackedOp::new(
            cycle,
            (self.op_init)(cycle),
            Arc::clone(&self.shared),
            Arc::clone(stride),
        )
    }

    fn acquire_slot(&self, cycle: u64) {
        let shared = &self.shared;
        let mut pending = shared.pending.lock();
        while *pending >= shared.max_pending {
            shared.ctx.metrics.op_tracker_blocked.increment();
            let waited = shared.freed.wait_for(&mut pending, shared.slice);
            if waited.timed_out() && *pending >= shared.max_pending {
                tracing::warn!(
                    motor = shared.slot,
                    cycle,
                    pending = *pending,
                    max_pending = shared.max_pending,
                    slice_ms = shared.slice.as_millis() as u64,
                    "op tracker still full after wait slice"
                );
            }
        }
        *pending += 1;
    }

    /// Whether the live count has reached the bound
    pub fn is_full(&self) -> bool {
        *self.shared.pending.lock() >= self.shared.max_pending
    }

    /// Ops not yet terminal
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Configured bound
    pub fn max_pending(&self) -> usize {
        self.shared.max_pending
    }

    /// Block until no op is pending; `false` if `timeout` elapsed first
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .freed
                        .wait_until(&mut pending, deadline)
                        .timed_out()
                    {
                        return *pending == 0;
                    }
                }
                // Timeout too large to represent: wait until drained.
                None => self.shared.freed.wait(&mut pending),
            }
        }
        true
    }
}

impl<D> std::fmt::Debug for OpTracker<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpTracker")
            .field("motor", &self.shared.slot)
            .field("pending", &self.pending())
            .field("max_pending", &self.shared.max_pending)
            .finish()
    }
}
