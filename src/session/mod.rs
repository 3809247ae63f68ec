//! Realtime voice session
//!
//! [`SessionController`] wires capture and playback to a transport channel and drives the
//! [`SessionMode`] state machine from their events.

mod controller;
mod mode;

pub use controller::{SessionController, SessionEvent, SessionSettings, SessionStatus};
pub use mode::{ModeEvent, SessionMode};
