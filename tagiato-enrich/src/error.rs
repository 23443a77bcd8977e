//! Error types for tagiato-enrich
//!
//! Invariant violations (second concurrent batch, duplicate in-flight
//! operation, empty track) are rejected synchronously with these errors at the
//! call boundary. Per-task failures never surface here; they are recorded on
//! the task and the photo instead.

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Photo, task or batch not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Conflict, e.g. a batch is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// State file could not be written; in-memory state is still valid
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// tagiato-common error
    #[error("Common error: {0}")]
    Common(#[from] tagiato_common::Error),
}

/// Result type for engine operations
pub type EnrichResult<T> = Result<T, EnrichError>;
