//! Relay socket messages.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Top-level frame type sent by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Status,
    Webhook,
    #[serde(other)]
    Unknown,
}

/// Discriminator carried by `status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Authenticated,
    Unauthorized,
    Ping,
    #[serde(other)]
    Unknown,
}

/// Routing metadata attached to a webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMeta {
    /// Stable id of this delivery; status updates are keyed by it.
    pub id: String,
    /// The service spells this key `bucked_id` on the wire.
    #[serde(rename = "bucked_id", alias = "bucket_id")]
    pub bucket_id: String,
    pub bucket_name: String,
    pub input_id: String,
    pub input_name: String,
    pub output_name: String,
    /// Where the webhook should be delivered.
    pub output_destination: String,
}

/// A frame pushed by the relay service.
///
/// Example webhook:
///
/// ```json
/// {
///   "type": "webhook",
///   "meta": {
///     "id": "8d6f1a0e-...",
///     "bucked_id": "1593fe5f-...",
///     "bucket_name": "github",
///     "output_destination": "http://localhost:8080/webhook"
///   },
///   "headers": { "Content-Type": ["application/json"] },
///   "query": "foo=bar",
///   "body": "{\"hi\": \"there\"}",
///   "method": "PUT"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: EventMeta,
    /// Header name to every value received for it.
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(rename = "query", default, deserialize_with = "null_as_default")]
    pub raw_query: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,

    // Status frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusKind>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// What a decoded [`Event`] means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Authenticated,
    Unauthorized { message: String },
    Ping,
    Webhook(Box<Event>),
    /// Unknown type, or a status frame with an unknown discriminator.
    Unrecognized(Box<Event>),
}

impl Event {
    /// Build a webhook event. Mostly useful for tests and tooling.
    pub fn webhook(meta: EventMeta, method: &str, body: &str) -> Self {
        Self {
            event_type: EventType::Webhook,
            meta,
            headers: HashMap::new(),
            raw_query: String::new(),
            body: body.to_string(),
            method: method.to_string(),
            status: None,
            message: String::new(),
        }
    }

    /// Build a status event.
    pub fn status(kind: StatusKind) -> Self {
        Self {
            event_type: EventType::Status,
            meta: EventMeta::default(),
            headers: HashMap::new(),
            raw_query: String::new(),
            body: String::new(),
            method: String::new(),
            status: Some(kind),
            message: String::new(),
        }
    }

    /// Append a header value, keeping any values already present.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Set the raw query string (without the leading `?`).
    pub fn with_query(mut self, query: &str) -> Self {
        self.raw_query = query.to_string();
        self
    }

    /// Interpret this event for the session driver.
    pub fn into_frame(self) -> Frame {
        match (self.event_type, self.status) {
            (EventType::Webhook, _) => Frame::Webhook(Box::new(self)),
            (EventType::Status, Some(StatusKind::Authenticated)) => Frame::Authenticated,
            (EventType::Status, Some(StatusKind::Unauthorized)) => Frame::Unauthorized {
                message: self.message,
            },
            (EventType::Status, Some(StatusKind::Ping)) => Frame::Ping,
            _ => Frame::Unrecognized(Box::new(self)),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A control frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionRequest {
    Auth { key: String, secret: String },
    Subscribe { buckets: Vec<String> },
    Pong,
}

impl ActionRequest {
    /// Create an `auth` request.
    pub fn auth(key: &str, secret: &str) -> Self {
        Self::Auth {
            key: key.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Create a `subscribe` request.
    pub fn subscribe(buckets: Vec<String>) -> Self {
        Self::Subscribe { buckets }
    }

    /// Name of the action, as sent on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Subscribe { .. } => "subscribe",
            Self::Pong => "pong",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
