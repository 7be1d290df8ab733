//! Motor module: one thread's cycle-dispatch loop
//!
//! The Motor is the core execution unit of cycle-bench. Each Motor owns one OS
//! thread and runs the loop **limit -> pull stride -> dispatch -> repeat**:
//!
//! 1. Waits on the stride rate limiter, if any
//! 2. Pulls a segment of up to `stride` cycles from the shared Input
//! 3. Opens a StrideTracker for the segment
//! 4. For every cycle, waits on the cycle rate limiter and dispatches it
//!    through the sync or async path picked when the motor was built
//! 5. Stops on input exhaustion or a stop request, then drains in-flight ops
//!
//! # Example
//!
//! ```ignore
//! use cycle_bench_core::motor::{MotorBuilder, MotorHandle};
//!
//! let motor = MotorBuilder::new(0)
//!     .input(input)
//!     .action(Action::sync(noop))
//!     .context(ctx)
//!     .handle(MotorHandle::new(0, tally))
//!     .stride(10)
//!     .build()?;
//!
//! let stats = motor.run()?;
//! println!("Dispatched: {}", stats.cycles_dispatched);
//! ```

mod builder;
mod dispatch;
mod executor;
mod handle;
mod stats;

pub use builder::MotorBuilder;
pub use executor::Motor;
pub use handle::MotorHandle;
pub use stats::MotorStats;

pub(crate) use dispatch::{AsyncDispatcher, DispatcherFactory, SyncDispatcher};
