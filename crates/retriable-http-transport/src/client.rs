//! Retrying HTTP client.

use crate::{TransportError, TransportResult};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_wait_min: Duration,
    /// Upper bound for the retry delay.
    pub retry_wait_max: Duration,
    /// Timeout for each individual attempt.
    pub request_timeout: Duration,
    /// Accept any TLS certificate.
    pub insecure_skip_verify: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_wait_min: Duration::from_secs(1),
            retry_wait_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            insecure_skip_verify: false,
        }
    }
}

/// A request that can be replayed on every attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Result of [`RetryingClient::send`].
#[derive(Debug)]
pub struct SendOutcome {
    /// The last response, or the last error when no attempt got a response.
    pub result: TransportResult<Response>,
    /// Attempts made beyond the first.
    pub retries: u32,
}

/// HTTP client that retries transient failures.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    config: TransportConfig,
    client: Client,
}

impl RetryingClient {
    /// Create a new retrying client.
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send `request`, retrying until it succeeds, fails permanently, or the
    /// retry budget runs out.
    ///
    /// When the budget runs out on an HTTP response, that last response is
    /// returned so the caller can inspect its status and body.
    pub async fn send(&self, request: &OutboundRequest) -> SendOutcome {
        let mut retries = 0;

        loop {
            let result = self.try_send(request).await;

            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status()),
                // Invalid URLs and the like fail the same way every time.
                Err(e) => !e.is_builder(),
            };

            if !retryable || retries >= self.config.max_retries {
                return SendOutcome {
                    result: result.map_err(TransportError::from),
                    retries,
                };
            }

            let delay = self.backoff(retries);
            match &result {
                Ok(response) => warn!(
                    url = %request.url,
                    status = response.status().as_u16(),
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed, retrying"
                ),
                Err(e) => warn!(
                    url = %request.url,
                    error = %e,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed, retrying"
                ),
            }

            // Release the failed response's connection before sleeping.
            drop(result);
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    /// Attempt to send the request once.
    async fn try_send(&self, request: &OutboundRequest) -> reqwest::Result<Response> {
        debug!(method = %request.method, url = %request.url, "Sending request");

        self.client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
    }

    /// Delay before retry number `retry + 1`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.config
            .retry_wait_min
            .saturating_mul(factor)
            .min(self.config.retry_wait_max)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}
