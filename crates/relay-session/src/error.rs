//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The service rejected the access key and secret
    #[error("Authentication failed, check your credentials: {0}")]
    Unauthorized(String),

    /// Nothing to subscribe to
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The dispatch pool stopped accepting webhooks
    #[error("Dispatch pool closed")]
    DispatchClosed,

    /// HTTP client setup error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
