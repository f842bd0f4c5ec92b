//! ARRAYMETA - Custom Error Types
//! Defines the error hierarchy for the array metadata store.

use std::io;

use thiserror::Error;

/// Custom Result type for the metadata store.
pub type Result<T> = std::result::Result<T, ArrayMetaError>;

/// Error types for the array metadata store.
#[derive(Error, Debug)]
pub enum ArrayMetaError {
    /// Malformed request (zero count, `Any` type, missing value, empty key).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not legal in the session's current open mode.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Ordinal lookup beyond the number of live keys.
    #[error("Index {index} out of range ({count} entries)")]
    OutOfRange { index: u64, count: u64 },

    /// Missing or incorrect key material for an encrypted array.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Data corruption detected (CRC mismatch, truncated or malformed bytes).
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// The storage location rejected a write.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Other I/O errors from fragment and header files.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<io::Error> for ArrayMetaError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => ArrayMetaError::PermissionDenied(err.to_string()),
            _ => ArrayMetaError::Io(err),
        }
    }
}

impl From<bincode::Error> for ArrayMetaError {
    fn from(err: bincode::Error) -> Self {
        ArrayMetaError::Corruption(format!("array header: {}", err))
    }
}
