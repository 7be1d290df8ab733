//! Motor statistics tracking

use std::time::{Duration, Instant};

use crate::state::RunState;

/// Statistics tracked by each motor
#[derive(Debug, Clone)]
pub struct MotorStats {
    /// Motor slot within its activity
    pub slot: usize,

    /// Strides opened
    pub strides: usize,

    /// Cycles handed to the action
    pub cycles_dispatched: u64,

    /// State the motor settled in
    pub final_state: RunState,

    /// Motor start time
    pub started_at: Option<Instant>,

    /// Motor end time
    pub ended_at: Option<Instant>,
}

impl MotorStats {
    /// Create new empty stats for `slot`
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            strides: 0,
            cycles_dispatched: 0,
            final_state: RunState::Uninitialized,
            started_at: None,
            ended_at: None,
        }
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Count one opened stride
    pub fn record_stride(&mut self, dispatched: usize) {
        self.strides += 1;
        self.cycles_dispatched += dispatched as u64;
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Cycles dispatched per second
    pub fn cycles_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.cycles_dispatched as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Merge counts from another motor
    pub fn merge(&mut self, other: &MotorStats) {
        self.strides += other.strides;
        self.cycles_dispatched += other.cycles_dispatched;
    }
}
