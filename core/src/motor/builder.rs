//! Builder pattern for Motor construction

use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::input::Input;
use crate::ops::OpContext;
use crate::output::{NullOutput, Output};
use crate::rate_limiter::RateLimiter;

use super::dispatch::TrackerSettings;
use super::executor::Motor;
use super::handle::MotorHandle;

/// Builder for creating Motor instances
///
/// # Example
/// ```ignore
/// let motor = MotorBuilder::new(0)
///     .input(input)
///     .action(Action::sync(noop))
///     .context(ctx)
///     .handle(MotorHandle::new(0, tally))
///     .stride(10)
///     .build()?;
/// ```
pub struct MotorBuilder {
    slot: usize,
    input: Option<Arc<dyn Input>>,
    action: Option<Action>,
    output: Option<Arc<dyn Output>>,
    context: Option<OpContext>,
    handle: Option<Arc<MotorHandle>>,
    stride: usize,
    max_pending: usize,
    backpressure_slice: Duration,
    drain_timeout: Duration,
    stride_limiter: Option<Arc<dyn RateLimiter>>,
    cycle_limiter: Option<Arc<dyn RateLimiter>>,
}

impl MotorBuilder {
    /// Create a new builder for the motor in `slot`
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            input: None,
            action: None,
            output: None,
            context: None,
            handle: None,
            stride: 1,
            max_pending: 100,
            backpressure_slice: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(60),
            stride_limiter: None,
            cycle_limiter: None,
        }
    }

    /// Set the input
    pub fn input(mut self, input: Arc<dyn Input>) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the action
    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Set the stride output (defaults to discarding)
    pub fn output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the completion context shared by this motor's ops
    pub fn context(mut self, context: OpContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the run-state handle
    pub fn handle(mut self, handle: Arc<MotorHandle>) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Set the stride size
    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Set the in-flight op bound
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set the length of one backpressure wait slice
    pub fn backpressure_slice(mut self, slice: Duration) -> Self {
        self.backpressure_slice = slice;
        self
    }

    /// Set the final drain bound
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the stride rate limiter
    pub fn stride_limiter(mut self, limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        self.stride_limiter = limiter;
        self
    }

    /// Set the cycle rate limiter
    pub fn cycle_limiter(mut self, limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        self.cycle_limiter = limiter;
        self
    }

    /// Build the Motor
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build(self) -> Result<Motor> {
        let input = self.input.ok_or(Error::missing_config("input"))?;
        let action = self.action.ok_or(Error::missing_config("action"))?;
        let context = self.context.ok_or(Error::missing_config("context"))?;
        let handle = self.handle.ok_or(Error::missing_config("handle"))?;
        let output = self.output.unwrap_or_else(|| Arc::new(NullOutput));
        let metrics = Arc::clone(context.metrics());

        let dispatcher = action.factory.build(
            TrackerSettings {
                slot: self.slot,
                max_pending: self.max_pending,
                slice: self.backpressure_slice,
            },
            context,
        );

        Ok(Motor::new(
            self.slot,
            input,
            dispatcher,
            output,
            self.stride,
            self.stride_limiter,
            self.cycle_limiter,
            metrics,
            self.drain_timeout,
            handle,
        ))
    }
}
