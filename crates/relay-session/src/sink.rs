//! Where webhook delivery outcomes go.

use crate::RelayResult;
use async_trait::async_trait;
use relay_protocol_types::{EventStatus, LogUpdate};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the outcome of every forwarded webhook.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, status: &EventStatus);
}

/// Logs outcomes locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn report(&self, status: &EventStatus) {
        log_status(status);
    }
}

fn log_status(status: &EventStatus) {
    if status.is_success() {
        info!(
            event_id = %status.id,
            status_code = status.status_code,
            retries = status.retries,
            "Webhook delivered"
        );
    } else {
        warn!(
            event_id = %status.id,
            status_code = status.status_code,
            retries = status.retries,
            message = %status.message,
            "Webhook delivery failed"
        );
    }
}

/// Logs outcomes and reports them to the relay service.
///
/// Each status becomes `PUT <server>/v1/logs/<event id>` with a
/// [`LogUpdate`] body, authenticated with the access key and secret.
/// Reporting failures are logged and otherwise ignored.
#[derive(Clone)]
pub struct HttpStatusSink {
    client: Client,
    api_base: String,
    access_key: String,
    access_secret: String,
}

impl HttpStatusSink {
    pub fn new(
        server_address: &str,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
        insecure_skip_verify: bool,
    ) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(STATUS_TIMEOUT)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base(server_address),
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        })
    }

    fn log_url(&self, id: &str) -> String {
        format!("{}/v1/logs/{}", self.api_base, id)
    }
}

impl std::fmt::Debug for HttpStatusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStatusSink")
            .field("api_base", &self.api_base)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn report(&self, status: &EventStatus) {
        log_status(status);

        if status.id.is_empty() {
            debug!("Skipping status update for webhook without id");
            return;
        }

        let url = self.log_url(&status.id);
        let result = self
            .client
            .put(&url)
            .basic_auth(&self.access_key, Some(&self.access_secret))
            .json(&LogUpdate::from(status))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(event_id = %status.id, "Status update sent");
            }
            Ok(response) => {
                let code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!(event_id = %status.id, status_code = code, body = %body, "Status update rejected");
            }
            Err(e) => warn!(event_id = %status.id, error = %e, "Status update failed"),
        }
    }
}

/// HTTP base for API calls, derived from the socket server address.
fn api_base(server_address: &str) -> String {
    let base = server_address
        .trim_end_matches('/')
        .trim_end_matches(crate::SOCKET_PATH)
        .trim_end_matches('/');

    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    }
}
