//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
