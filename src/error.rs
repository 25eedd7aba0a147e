//! Error types for the Blitz proxy.

use thiserror::Error;

/// Main error type for Blitz operations.
#[derive(Error, Debug)]
pub enum BlitzError {
    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine needs at least one queue to admit anything
    #[error("at least one queue is required")]
    NoQueues,

    /// Token has the wrong length or is not valid base64
    #[error("reservation token has an invalid format")]
    InvalidReservationFormat,

    /// Token signature did not verify against the server keypair
    #[error("reservation token has an invalid signature")]
    InvalidReservationSignature,

    /// Token presented after its validity window closed
    #[error("reservation expired (was valid from {from_ms} until {until_ms})")]
    ReservationExpired { from_ms: u64, until_ms: u64 },

    /// Client went away while a wait was in progress
    #[error("request cancelled by client")]
    RequestCancelled,

    /// No queue can ever grant the request
    #[error("∞ delay")]
    InfiniteDelay,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Blitz operations.
pub type Result<T> = std::result::Result<T, BlitzError>;
