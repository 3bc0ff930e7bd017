//! Transport error types.

use thiserror::Error;

/// Peer transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown constructor id {0:#010x}")]
    UnknownConstructor(u32),

    #[error("truncated message")]
    Truncated,

    #[error("session disconnected")]
    Disconnected,

    #[error("no query handler registered")]
    NoHandler,

    #[error("answer of {size} bytes exceeds budget {max}")]
    AnswerTooLarge { size: usize, max: u64 },

    #[error("address lookup failed: {0}")]
    Lookup(String),

    #[error("unable to connect: {0}")]
    Connect(String),

    #[error("no active request {0} found")]
    UnknownRequest(String),

    #[error("peer sent {got} bytes for a {max} byte chunk budget")]
    OversizedChunk { got: usize, max: usize },

    #[error("invalid max chunk size {0}")]
    InvalidChunkSize(i32),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),

    #[error("query failed: {0}")]
    Query(String),

    #[error("payload read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
