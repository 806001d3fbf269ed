//! Shared wire definitions for the signal relay.

pub mod role;
pub mod signal;
pub mod status;

pub use role::{ConnectParams, DEFAULT_ROOM, Role};
pub use signal::{PUBLISHER_PRESENT_REASON, ServerMessage, Signal, SignalError, inspect};
pub use status::StatusReport;
