//! Transport error types.

use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    /// The request failed before a response arrived
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
