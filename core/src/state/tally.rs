//! Cross-thread tally of motor run states

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::RunState;
use crate::error::{Error, Result};

/// Per-activity count of motors in each [`RunState`]
///
/// All mutations and all predicate evaluations happen under one lock.
/// Waiters are only woken when some state's count crosses between zero and
/// non-zero, which is the only thing any of the `await_*` predicates can
/// observe; plain +1/-1 steps above zero stay silent.
#[derive(Default)]
pub struct RunStateTally {
    counts: Mutex<[usize; RunState::COUNT]>,
    edge: Condvar,
}

/// Point-in-time copy of the tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallySnapshot {
    counts: [usize; RunState::COUNT],
    /// Whether the await that produced this snapshot hit its deadline
    pub timed_out: bool,
}

impl TallySnapshot {
    /// Motors in `state`
    pub fn count(&self, state: RunState) -> usize {
        self.counts[state.index()]
    }

    /// Motors tracked in any state
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Whether any of `states` has a motor in it
    pub fn any_of(&self, states: &[RunState]) -> bool {
        states.iter().any(|s| self.count(*s) > 0)
    }

    /// Whether none of `states` has a motor in it
    pub fn none_of(&self, states: &[RunState]) -> bool {
        !self.any_of(states)
    }

    /// Whether every motor is in one of `states` (vacuously true when empty)
    pub fn none_other(&self, states: &[RunState]) -> bool {
        RunState::ALL
            .iter()
            .filter(|s| !states.contains(s))
            .all(|s| self.count(*s) == 0)
    }
}

impl fmt::Display for TallySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for state in RunState::ALL {
            let n = self.count(state);
            if n == 0 {
                continue;
            }
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}:{}", state.code(), n)?;
            first = false;
        }
        if first {
            f.write_str("(empty)")?;
        }
        if self.timed_out {
            f.write_str(" [timed out]")?;
        }
        Ok(())
    }
}

impl RunStateTally {
    /// Create an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new motor in `state`
    pub fn add(&self, state: RunState) {
        let mut counts = self.counts.lock();
        counts[state.index()] += 1;
        if counts[state.index()] == 1 {
            self.edge.notify_all();
        }
    }

    /// Forget a motor that was in `state`
    pub fn remove(&self, state: RunState) -> Result<()> {
        let mut counts = self.counts.lock();
        let slot = &mut counts[state.index()];
        if *slot == 0 {
            return Err(Error::TallyUnderflow(state));
        }
        *slot -= 1;
        if *slot == 0 {
            self.edge.notify_all();
        }
        Ok(())
    }

    /// Move one motor from `from` to `to` atomically
    pub fn change(&self, from: RunState, to: RunState) -> Result<()> {
        let mut counts = self.counts.lock();
        if counts[from.index()] == 0 {
            return Err(Error::TallyUnderflow(from));
        }
        counts[from.index()] -= 1;
        counts[to.index()] += 1;
        if counts[from.index()] == 0 || counts[to.index()] == 1 {
            self.edge.notify_all();
        }
        Ok(())
    }

    /// Current counts without waiting
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            counts: *self.counts.lock(),
            timed_out: false,
        }
    }

    /// Block until any of `states` is occupied, or `timeout` elapses
    pub fn await_any(&self, states: &[RunState], timeout: Duration) -> TallySnapshot {
        self.await_until(timeout, |snap| snap.any_of(states))
    }

    /// Block until none of `states` is occupied, or `timeout` elapses
    pub fn await_none_of(&self, states: &[RunState], timeout: Duration) -> TallySnapshot {
        self.await_until(timeout, |snap| snap.none_of(states))
    }

    /// Block until every motor sits in one of `states`, or `timeout` elapses
    pub fn await_none_other(&self, states: &[RunState], timeout: Duration) -> TallySnapshot {
        self.await_until(timeout, |snap| snap.none_other(states))
    }

    fn await_until<F>(&self, timeout: Duration, predicate: F) -> TallySnapshot
    where
        F: Fn(&TallySnapshot) -> bool,
    {
        // `None` means the timeout is too large to represent: wait forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut counts = self.counts.lock();
        loop {
            let snap = TallySnapshot {
                counts: *counts,
                timed_out: false,
            };
            if predicate(&snap) {
                return snap;
            }
            // Spurious wakeups and unrelated edges just loop back to the check.
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return TallySnapshot {
                        timed_out: true,
                        ..snap
                    };
                }
                Some(deadline) => {
                    self.edge.wait_until(&mut counts, deadline);
                }
                None => self.edge.wait(&mut counts),
            }
        }
    }
}

impl fmt::Debug for RunStateTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunStateTally")
            .field(&self.snapshot().to_string())
            .finish()
    }
}
