//! Wire vocabulary for the webhook relay socket.
//!
//! - [`Event`]: every frame the service pushes to the client (status control
//!   frames and webhook deliveries), classified into a [`Frame`].
//! - [`ActionRequest`]: every frame the client sends (auth, subscribe, pong).
//! - [`EventStatus`]: the outcome of forwarding one webhook, plus the
//!   [`LogUpdate`] payload used to report it back to the service.

mod messages;
mod status;

pub use messages::{ActionRequest, Event, EventMeta, EventType, Frame, StatusKind};
pub use status::{EventStatus, LogUpdate, RequestStatus};
