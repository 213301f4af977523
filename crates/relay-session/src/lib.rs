//! Relay socket session for the webhook relay client.
//!
//! This crate provides:
//! - [`RelaySession`]: the connection state machine (connect, authenticate,
//!   subscribe, health monitoring, reconnect forever)
//! - [`DispatchPool`]: a bounded worker pool that forwards webhooks without
//!   blocking the socket
//! - [`StatusSink`]: where delivery outcomes are reported

mod connection;
mod dispatch;
mod error;
mod session;
mod sink;
mod tls;

pub use connection::{socket_url, SOCKET_PATH};
pub use dispatch::{DispatchConfig, DispatchPool};
pub use error::{RelayError, RelayResult};
pub use session::{Filter, RelayConfig, RelaySession, SessionState};
pub use sink::{HttpStatusSink, LogStatusSink, StatusSink};

pub use tokio_util::sync::CancellationToken;
