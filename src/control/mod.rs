//! Control module - the connection to the main controller and the executor
//! state machine it drives.
//!
//! - [`ControlChannel`]: framing and decoding of control messages
//! - [`state`]: executor states and the data-driven transition tables
//! - [`PeriodicCall`]: liveness timer with exponential backoff

mod channel;
mod liveness;
pub mod state;

pub use channel::ControlChannel;
pub use liveness::PeriodicCall;
pub use state::{apply_local, next_state, ExecutorState, LocalAction, Role};
