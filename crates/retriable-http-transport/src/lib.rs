//! HTTP delivery with retries.
//!
//! [`RetryingClient`] sends one request, retrying connection failures,
//! `429 Too Many Requests` and `5xx` responses (except `501`) with
//! exponential backoff, and reports how many retries it used.

mod client;
mod error;

pub use client::{OutboundRequest, RetryingClient, SendOutcome, TransportConfig};
pub use error::{TransportError, TransportResult};

// Re-exported so callers can build requests without depending on reqwest.
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, Response, StatusCode};
