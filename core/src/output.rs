//! Stride result consumers

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome code for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    /// Cycle number
    pub cycle: u64,
    /// Status code reported by the action or error handler
    pub result_code: i32,
}

/// Every cycle outcome of one finished stride
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrideResult {
    /// First cycle of the stride
    pub first_cycle: u64,
    /// Per-cycle outcomes, ordered by cycle
    pub results: Vec<CycleResult>,
    /// Time from stride open to its last completion
    pub service_time: Duration,
    /// Service time plus the stride rate-limiter delay
    pub response_time: Duration,
    /// Wall-clock completion time
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl StrideResult {
    /// Number of cycles in the stride
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the stride closed with no cycles
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Consumer of completed strides
///
/// Called from whichever thread completes a stride's last cycle: the motor
/// thread on the sync path, a driver thread on the async path.
pub trait Output: Send + Sync {
    /// Take one finished stride
    fn on_stride_result(&self, result: &StrideResult);
}

/// Output that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl Output for NullOutput {
    fn on_stride_result(&self, _result: &StrideResult) {}
}

/// Output that keeps every stride in memory
#[derive(Debug, Default)]
pub struct ResultCollector {
    strides: Mutex<Vec<StrideResult>>,
}

impl ResultCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the strides received so far
    pub fn strides(&self) -> Vec<StrideResult> {
        self.strides.lock().clone()
    }

    /// Number of strides received
    pub fn stride_count(&self) -> usize {
        self.strides.lock().len()
    }

    /// All cycle outcomes received, ordered by cycle
    pub fn cycle_results(&self) -> Vec<CycleResult> {
        let mut all: Vec<CycleResult> = self
            .strides
            .lock()
            .iter()
            .flat_map(|s| s.results.iter().copied())
            .collect();
        all.sort_by_key(|r| r.cycle);
        all
    }

    /// How often each result code occurred
    pub fn result_code_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for stride in self.strides.lock().iter() {
            for r in &stride.results {
                *counts.entry(r.result_code).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Output for ResultCollector {
    fn on_stride_result(&self, result: &StrideResult) {
        self.strides.lock().push(result.clone());
    }
}
