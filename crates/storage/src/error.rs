//! Storage error types.

use std::sync::Arc;
use thiserror::Error;

/// An error shared between every waiter of a coalesced operation.
pub type SharedError = Arc<StorageError>;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bag admission failed: {0}")]
    Admission(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The downloader cancelled the fetch internally. Retryable while the
    /// caller is still alive, unlike [`StorageError::Cancelled`].
    #[error("download cancelled")]
    DownloadCancelled,

    #[error("operation cancelled")]
    Cancelled,

    #[error("bag is closed")]
    Closed,

    #[error("unable to download piece {0}: {1}")]
    Piece(u32, SharedError),

    #[error("unable to write piece: {0}")]
    Write(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
