//! Bus error types.

use thiserror::Error;

/// A publish call did not reach the bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The remote bus could not be reached (refused, reset, timed out).
    #[error("bus transport error: {0}")]
    Transport(String),

    /// The remote bus answered with a non-success status.
    #[error("bus rejected publish with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The payload could not be encoded for publishing.
    #[error("payload encoding failed: {0}")]
    Encode(String),
}

/// A subscription could not be established or broke mid-stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("bus returned status {status}: {body}")]
    Status { status: u16, body: String },
}
