//! Stride-level completion accounting

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::metrics::ActivityMetrics;
use crate::output::{CycleResult, Output, StrideResult};

struct StrideState {
    results: Vec<CycleResult>,
    expected: usize,
    closed: bool,
}

/// Collects the outcomes of one stride's cycles
///
/// Completions may arrive from any thread and in any order. When the last
/// expected cycle reports in, stride service and response times are recorded
/// and the ordered batch goes to the [`Output`].
pub struct StrideTracker {
    first_cycle: u64,
    opened_at: Instant,
    wait_time: Duration,
    state: Mutex<StrideState>,
    output: Arc<dyn Output>,
    metrics: Arc<ActivityMetrics>,
}

impl StrideTracker {
    /// Open a stride expecting `size` cycles starting at `first_cycle`
    ///
    /// `wait_time` is the delay the stride rate limiter imposed before the
    /// stride was opened.
    pub fn new(
        first_cycle: u64,
        size: usize,
        wait_time: Duration,
        output: Arc<dyn Output>,
        metrics: Arc<ActivityMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            first_cycle,
            opened_at: Instant::now(),
            wait_time,
            state: Mutex::new(StrideState {
                results: Vec::with_capacity(size),
                expected: size,
                closed: false,
            }),
            output,
            metrics,
        })
    }

    /// First cycle of the stride
    pub fn first_cycle(&self) -> u64 {
        self.first_cycle
    }

    /// Record the outcome of one cycle
    pub fn on_cycle_result(&self, cycle: u64, result_code: i32) {
        let finished = {
            let mut state = self.state.lock();
            if state.closed {
                tracing::warn!(cycle, first_cycle = self.first_cycle, "result after stride closed");
                return;
            }
            state.results.push(CycleResult { cycle, result_code });
            Self::take_if_done(&mut state)
        };
        if let Some(results) = finished {
            self.emit(results);
        }
    }

    /// Shrink the stride to the cycles actually dispatched
    ///
    /// Used when a motor stops partway through a stride so the batch can
    /// still close once the dispatched cycles complete.
    pub fn truncate(&self, dispatched: usize) {
        let finished = {
            let mut state = self.state.lock();
            if state.closed || dispatched >= state.expected {
                return;
            }
            state.expected = dispatched.max(state.results.len());
            Self::take_if_done(&mut state)
        };
        if let Some(results) = finished {
            self.emit(results);
        }
    }

    /// Cycles still outstanding
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock();
        state.expected - state.results.len()
    }

    /// Whether every expected cycle has reported
    pub fn is_complete(&self) -> bool {
        self.state.lock().closed
    }

    fn take_if_done(state: &mut StrideState) -> Option<Vec<CycleResult>> {
        if state.results.len() < state.expected {
            return None;
        }
        state.closed = true;
        Some(std::mem::take(&mut state.results))
    }

    fn emit(&self, mut results: Vec<CycleResult>) {
        if results.is_empty() {
            return;
        }
        let service_time = self.opened_at.elapsed();
        let response_time = service_time + self.wait_time;
        self.metrics.stride_service.update(service_time);
        self.metrics.stride_response.update(response_time);

        results.sort_by_key(|r| r.cycle);
        self.output.on_stride_result(&StrideResult {
            first_cycle: self.first_cycle,
            results,
            service_time,
            response_time,
            completed_at: chrono::Utc::now(),
        });
    }
}

impl std::fmt::Debug for StrideTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StrideTracker")
            .field("first_cycle", &self.first_cycle)
            .field("expected", &state.expected)
            .field("received", &state.results.len())
            .field("closed", &state.closed)
            .finish()
    }
}
