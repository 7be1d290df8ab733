//! Simulated workloads driven by the `run` command
//!
//! Both actions sleep for a jittered latency and fail a configurable share of
//! attempts with an `Overloaded` driver error. One chosen cycle can report an
//! unapplied conditional write instead. With the default `retry,warn,count`
//! rules that op is retried up to `max_tries` and then ends Failed; it only
//! stops the activity under rules such as `NotApplied=stop;*=retry`.

use std::sync::Arc;
use std::time::Duration;

use cycle_bench_core::{Action, ActionError, AsyncAction, OpError, TrackedOp};
use rand::Rng;
use tokio::runtime::Handle;

/// Latency and failure profile shared by both workloads
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub latency: Duration,
    pub jitter: Duration,
    pub fail_rate: f64,
    pub not_applied_cycle: Option<u64>,
}

impl Profile {
    /// Pick the latency and outcome of one attempt
    fn roll(&self, cycle: u64) -> (Duration, Result<i32, OpError>) {
        let mut rng = rand::thread_rng();
        let jitter_ms = self.jitter.as_millis() as u64;
        let delay = self.latency + Duration::from_millis(rng.gen_range(0..=jitter_ms));

        let outcome = if Some(cycle) == self.not_applied_cycle {
            Err(OpError::NotApplied { cycle })
        } else if self.fail_rate > 0.0 && rng.gen_bool(self.fail_rate.min(1.0)) {
            Err(OpError::driver("Overloaded", format!("cycle {cycle} rejected")))
        } else {
            Ok(0)
        };
        (delay, outcome)
    }
}

/// Blocking statement executed on the motor thread
pub struct SimulatedStatement {
    profile: Profile,
}

impl SimulatedStatement {
    pub fn action(profile: Profile) -> Action {
        Action::sync(Self { profile })
    }
}

impl cycle_bench_core::SyncAction for SimulatedStatement {
    fn run_cycle(&mut self, cycle: u64) -> Result<i32, ActionError> {
        let (delay, outcome) = self.profile.roll(cycle);
        std::thread::sleep(delay);
        Ok(outcome?)
    }
}

/// Non-blocking driver completing ops on a tokio runtime
pub struct SimulatedDriver {
    profile: Profile,
    runtime: Handle,
}

impl SimulatedDriver {
    pub fn new(profile: Profile, runtime: Handle) -> Arc<Self> {
        Arc::new(Self { profile, runtime })
    }
}

impl AsyncAction for SimulatedDriver {
    type Op = ();

    fn op_init(&self, _cycle: u64) {}

    fn execute(&self, op: TrackedOp<()>) {
        let profile = self.profile;
        self.runtime.spawn(async move {
            let mut op = op;
            loop {
                let (delay, outcome) = profile.roll(op.cycle());
                tokio::time::sleep(delay).await;
                match outcome {
                    Ok(code) => {
                        if let Err(e) = op.succeed(code) {
                            tracing::warn!(error = %e, "Could not complete op");
                        }
                        return;
                    }
                    Err(error) => match op.fail(error) {
                        Some(retry) => op = retry,
                        None => return,
                    },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(fail_rate: f64) -> Profile {
        Profile {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            fail_rate,
            not_applied_cycle: Some(7),
        }
    }

    #[test]
    fn test_roll_outcomes() {
        assert_eq!(profile(0.0).roll(1).1, Ok(0));
        assert_eq!(profile(0.0).roll(7).1, Err(OpError::NotApplied { cycle: 7 }));
        assert!(matches!(
            profile(1.0).roll(1).1,
            Err(OpError::Driver { ref kind, .. }) if kind == "Overloaded"
        ));
    }

    #[test]
    fn test_roll_latency_within_jitter() {
        let p = Profile {
            latency: Duration::from_millis(3),
            jitter: Duration::from_millis(2),
            ..profile(0.0)
        };
        for _ in 0..50 {
            let (delay, _) = p.roll(0);
            assert!(delay >= Duration::from_millis(3));
            assert!(delay <= Duration::from_millis(5));
        }
    }
}
