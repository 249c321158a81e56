//! Error types for the polling core.

use thiserror::Error;

/// Errors from a single sample fetch. Never fatal; the slot just keeps its
/// previous value until the next cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("source returned status {0}")]
    Status(reqwest::StatusCode),

    /// The body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configured field is absent from the body.
    #[error("response has no '{field}' field")]
    MissingField { field: String },

    /// The field is present but does not hold a single finite number.
    #[error("field '{field}' is not numeric: {raw}")]
    NotNumeric { field: String, raw: String },

    /// The source flagged the response as unsuccessful.
    #[error("source reported failure")]
    Rejected,
}

/// Errors surfaced to callers of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// Slot counts must be zero or more. The pool is left untouched.
    #[error("slot count must be non-negative, got {0}")]
    NegativeSlotCount(i64),

    /// Not enough memory to hold that many slots. The pool is left untouched.
    #[error("slot count {0} is too large")]
    SlotCountTooLarge(i64),

    /// `start` was called while a cycle is still settling.
    #[error("a poll cycle is already in flight")]
    CycleInFlight,

    /// The monitor run loop has exited.
    #[error("monitor is not running")]
    Stopped,
}
