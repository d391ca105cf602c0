//! Storage error types.

use thiserror::Error;

/// Errors that can occur in the object model and storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The requested reference was not found.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// An object was parsed as the wrong kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The kind the caller asked for.
        expected: &'static str,
        /// The kind the object actually has.
        actual: &'static str,
    },

    /// An object payload could not be parsed.
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// An object id is not exactly 40 hex characters.
    #[error("malformed object id: {0:?}")]
    MalformedObjectId(String),

    /// A commit has no tree reference.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
