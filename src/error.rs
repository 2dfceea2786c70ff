//! Error types for the blob storage core

use thiserror::Error;

use crate::adapters::remote::{ApiError, FaultPoint};
use crate::domain::ContentAddress;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the blob storage core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Addressing
    // =========================================================================
    /// Malformed content address. Always a caller bug.
    #[error("invalid content address: {0}")]
    InvalidAddress(String),

    /// The requested blob is absent
    #[error("blob not found: {0}")]
    NotFound(ContentAddress),

    // =========================================================================
    // Construction / configuration
    // =========================================================================
    /// A configuration field was rejected
    #[error("configuration error in {field:?}: {message}")]
    Config { field: String, message: String },

    /// Duration parse error
    #[error("failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Runtime
    // =========================================================================
    /// Network or protocol failure talking to a remote backend
    #[error("transport error: {0}")]
    Transport(#[from] ApiError),

    /// Sniffer buffer overflowed; the full body is not available
    #[error("blob body truncated: {written} bytes written, {limit} retained")]
    Truncated { written: u64, limit: usize },

    /// Declared and actual byte counts disagree on write
    #[error("length mismatch for {address}: declared {declared}, received {actual}")]
    LengthMismatch {
        address: ContentAddress,
        declared: u64,
        actual: u64,
    },

    /// Received content does not hash to the address it was stored under
    #[error("content of {address} hashes to {computed}")]
    HashMismatch {
        address: ContentAddress,
        computed: String,
    },

    /// Sub-range read starting beyond the end of the blob
    #[error("offset {offset} out of range for {address} ({size} bytes)")]
    OutOfRange {
        address: ContentAddress,
        offset: u64,
        size: u64,
    },

    /// Blob looked like a schema blob but failed to decode as one
    #[error("invalid schema blob: {0}")]
    InvalidSchema(String),

    /// Operation abandoned on external cancellation or deadline
    #[error("operation cancelled")]
    Cancelled,

    /// Failure forced by an armed fault injector
    #[error("injected fault at {0}")]
    Injected(FaultPoint),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a configuration error for `field`.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for the "blob is absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
