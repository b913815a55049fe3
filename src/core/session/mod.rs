//! Session lifecycle: state machine, outbound queue and controller.

mod controller;
mod queue;
mod state;

pub use controller::{PlaybackSink, SendOutcome, SessionController, SessionError};
pub use queue::OutboundQueue;
pub use state::SessionState;
