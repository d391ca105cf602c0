//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A command line the session does not understand.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The `service` value is neither upload-pack nor receive-pack.
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    /// A pack entry with a type code other than 1-4 or 7.
    #[error("unsupported object type {0} in pack")]
    UnsupportedObjectType(u8),

    /// Invalid pack file format.
    #[error("invalid pack file: {0}")]
    InvalidPack(String),

    /// The trailing pack checksum does not match the received bytes.
    #[error("pack checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest sent by the client.
        expected: String,
        /// Digest computed over the received bytes.
        actual: String,
    },

    /// A ref-delta names a base that is neither in the pack nor in storage.
    #[error("missing delta base: {0}")]
    MissingDeltaBase(String),

    /// The base buffer length differs from the delta's declared base size.
    #[error("delta base size mismatch: expected {expected}, got {actual}")]
    DeltaBaseSizeMismatch {
        /// Size declared in the delta header.
        expected: usize,
        /// Actual base length.
        actual: usize,
    },

    /// A copy or insert instruction reaches outside its source buffer.
    #[error("delta instruction out of range: {0}")]
    DeltaRangeError(String),

    /// Applying the delta did not produce the declared result size.
    #[error("delta produced {actual} bytes, expected {expected}")]
    DeltaIncomplete {
        /// Size declared in the delta header.
        expected: usize,
        /// Bytes actually produced.
        actual: usize,
    },

    /// A stored object does not hash to its id.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// The request body ended before the session reached its final stage.
    #[error("unexpected end of input: {0}")]
    UnexpectedEof(String),

    /// The response sink was closed by the client.
    #[error("client disconnected")]
    ClientDisconnected,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] packhouse_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
