//! Ingest error types.

use thiserror::Error;

/// Outbound HTTP errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("non-ok response {0}")]
    Status(reqwest::StatusCode),
}

/// Result type for ingest operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
