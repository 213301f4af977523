//! Delivery outcome records.

use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Outcome of forwarding one webhook to its destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatus {
    /// Id of the originating event (`meta.id`).
    pub id: String,
    /// HTTP status returned by the destination, 0 when no response arrived.
    pub status_code: u16,
    /// Attempts made beyond the first.
    pub retries: u32,
    /// Transport error, or the response body of a rejected delivery.
    pub message: String,
}

impl EventStatus {
    /// Create an empty status for the given event id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Whether the destination accepted the webhook.
    pub fn is_success(&self) -> bool {
        RequestStatus::from_code(self.status_code) == RequestStatus::Sent
    }
}

/// Lifecycle status of a request log on the relay service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "u8")]
pub enum RequestStatus {
    Preparing = 0,
    Sent = 1,
    Failed = 2,
    /// The destination wasn't listening, so incoming requests stall.
    Stalled = 3,
    Received = 4,
    Rejected = 5,
}

impl RequestStatus {
    /// Derive a request status from a delivery's HTTP status code.
    pub fn from_code(code: u16) -> Self {
        if (200..=300).contains(&code) {
            Self::Sent
        } else {
            Self::Failed
        }
    }
}

impl From<u8> for RequestStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Preparing,
            1 => Self::Sent,
            3 => Self::Stalled,
            4 => Self::Received,
            5 => Self::Rejected,
            _ => Self::Failed,
        }
    }
}

// The service stores request statuses as integers.
impl Serialize for RequestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Stalled => "stalled",
            Self::Received => "received",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Request log update reported to the relay service for one delivery.
///
/// `response_body` is base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogUpdate {
    pub status_code: u16,
    #[serde(serialize_with = "as_base64")]
    pub response_body: Vec<u8>,
    pub status: RequestStatus,
    pub retries: u32,
}

impl From<&EventStatus> for LogUpdate {
    fn from(status: &EventStatus) -> Self {
        Self {
            status_code: status.status_code,
            response_body: status.message.clone().into_bytes(),
            status: RequestStatus::from_code(status.status_code),
            retries: status.retries,
        }
    }
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}
