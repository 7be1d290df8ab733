//! Motor lifecycle states and their cross-thread tally
//!
//! Every motor owns one [`RunState`]; the activity owns one [`RunStateTally`]
//! that mirrors how many motors currently sit in each state. Controllers
//! block on the tally rather than polling individual motors.

mod run_state;
mod tally;

pub use run_state::RunState;
pub use tally::{RunStateTally, TallySnapshot};
