//! Poll cycle scheduling.
//!
//! The state machine ([`state::PollScheduler`]) is synchronous and does no I/O; the
//! async [`Monitor`] wraps it with the fetches, the re-arm timer and the
//! command channel.

pub mod cycle;
pub mod runner;
pub mod state;

pub use cycle::CycleId;
pub use runner::{Monitor, MonitorHandle, MonitorSnapshot, DEFAULT_INTERVAL};
