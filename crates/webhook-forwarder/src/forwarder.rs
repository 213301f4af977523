//! Default webhook forwarder.

use async_trait::async_trait;
use relay_protocol_types::{Event, EventStatus};
use retriable_http_transport::{
    HeaderMap, HeaderName, HeaderValue, Method, OutboundRequest, RetryingClient, SendOutcome,
    TransportConfig, TransportResult,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Headers the HTTP client derives from the request itself.
const CLIENT_MANAGED_HEADERS: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

/// Delivers one webhook event and reports the outcome.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward `event` to its destination. Never fails: every failure is
    /// described in the returned status.
    async fn forward(&self, event: Event) -> EventStatus;
}

/// Forwarder configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Maximum retries per delivery.
    pub retries: u32,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Initial delay between retries.
    pub retry_wait_min: Duration,
    /// Maximum delay between retries.
    pub retry_wait_max: Duration,
    /// Timeout for each attempt.
    pub request_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            retries: transport.max_retries,
            insecure: transport.insecure_skip_verify,
            retry_wait_min: transport.retry_wait_min,
            retry_wait_max: transport.retry_wait_max,
            request_timeout: transport.request_timeout,
        }
    }
}

impl From<&ForwarderConfig> for TransportConfig {
    fn from(config: &ForwarderConfig) -> Self {
        Self {
            max_retries: config.retries,
            retry_wait_min: config.retry_wait_min,
            retry_wait_max: config.retry_wait_max,
            request_timeout: config.request_timeout,
            insecure_skip_verify: config.insecure,
        }
    }
}

/// Forwarder backed by [`RetryingClient`].
#[derive(Debug, Clone)]
pub struct DefaultForwarder {
    transport: RetryingClient,
}

impl DefaultForwarder {
    /// Create a forwarder with the given configuration.
    pub fn new(config: ForwarderConfig) -> TransportResult<Self> {
        let transport = RetryingClient::new(TransportConfig::from(&config))?;
        Ok(Self { transport })
    }
}

#[async_trait]
impl Forwarder for DefaultForwarder {
    async fn forward(&self, event: Event) -> EventStatus {
        let id = event.meta.id.clone();
        let destination = destination_url(&event);

        let method = match parse_method(&event.method) {
            Ok(method) => method,
            Err(message) => {
                warn!(event_id = %id, method = %event.method, "Invalid webhook method");
                return EventStatus {
                    id,
                    status_code: 0,
                    retries: 0,
                    message,
                };
            }
        };

        let request = OutboundRequest {
            method,
            url: destination,
            headers: copy_headers(&event.headers),
            body: event.body.into_bytes(),
        };

        let outcome = self.transport.send(&request).await;
        let status = classify(id, outcome).await;

        info!(
            event_id = %status.id,
            status_code = status.status_code,
            destination = %request.url,
            method = %request.method,
            retries = status.retries,
            "webhook forwarded"
        );

        status
    }
}

/// Destination with the raw query string appended.
fn destination_url(event: &Event) -> String {
    if event.raw_query.is_empty() {
        event.meta.output_destination.clone()
    } else {
        format!("{}?{}", event.meta.output_destination, event.raw_query)
    }
}

fn parse_method(method: &str) -> Result<Method, String> {
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.as_bytes())
        .map_err(|e| format!("invalid request method '{}': {}", method, e))
}

/// Copy every header value, skipping headers that aren't valid HTTP.
fn copy_headers(source: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in source {
        let header_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header_name) => header_name,
            Err(_) => {
                warn!(header = %name, "Skipping invalid header name");
                continue;
            }
        };
        if CLIENT_MANAGED_HEADERS.contains(&header_name.as_str()) {
            continue;
        }

        for value in values {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    headers.append(header_name.clone(), header_value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid header value"),
            }
        }
    }

    headers
}

async fn classify(id: String, outcome: SendOutcome) -> EventStatus {
    let retries = outcome.retries;

    match outcome.result {
        Err(e) => EventStatus {
            id,
            status_code: 0,
            retries,
            message: format!("request failed, {}", e),
        },
        Ok(response) => {
            let status_code = response.status().as_u16();
            let message = if status_code > 399 {
                // The destination's explanation for rejecting the webhook.
                match response.text().await {
                    Ok(body) => body,
                    Err(e) => format!("failed to read response body, error: {}", e),
                }
            } else {
                String::new()
            };

            EventStatus {
                id,
                status_code,
                retries,
                message,
            }
        }
    }
}
