//! Error types for sync state persistence.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or persisting sync state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted document could not be decoded.
    #[error("sync state corrupted: {0}")]
    Corrupted(String),

    /// The document could not be encoded.
    #[error("sync state encoding failed: {0}")]
    Encode(String),

    /// Another writer holds the state file.
    #[error("sync state is locked by another process: {0}")]
    Locked(String),
}
