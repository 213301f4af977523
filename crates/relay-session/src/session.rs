//! Relay session driver.
//!
//! A [`RelaySession`] keeps one socket to the relay service open for as long
//! as its cancellation token is live. It authenticates, subscribes to the
//! configured buckets, answers pings and hands webhooks to the dispatch pool.
//! Any connection loss or missed ping leads back to dialing; only a rejected
//! access key or cancellation ends the run.

use crate::connection::{socket_url, ActiveConnection, ReaderSignal};
use crate::tls::insecure_client_config;
use crate::{DispatchConfig, DispatchPool, RelayError, RelayResult, StatusSink};
use readiness_notifier::ReadinessNotifier;
use relay_protocol_types::{ActionRequest, Event, Frame};
use rustls::ClientConfig;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Permit;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webhook_forwarder::Forwarder;

/// Webhooks held by the driver while every worker is busy.
const MAX_BACKLOG: usize = 1024;

/// Relay session configuration.
#[derive(Clone)]
pub struct RelayConfig {
    /// Relay server address (e.g. https://my.webhookrelay.com:443).
    pub server_address: String,
    pub access_key: String,
    pub access_secret: String,
    /// Skip TLS certificate verification.
    pub insecure_skip_verify: bool,
    /// How long to wait for a ping before the connection is considered dead.
    pub health_timeout: Duration,
    /// Pause between failed dial attempts.
    pub reconnect_delay: Duration,
    pub dispatch: DispatchConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_address: "https://my.webhookrelay.com:443".to_string(),
            access_key: String::new(),
            access_secret: String::new(),
            insecure_skip_verify: false,
            health_timeout: Duration::from_secs(53),
            reconnect_delay: Duration::from_secs(2),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("server_address", &self.server_address)
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("health_timeout", &self.health_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

/// Which buckets to subscribe to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub bucket: Option<String>,
    pub buckets: Vec<String>,
}

impl Filter {
    pub fn new(buckets: Vec<String>) -> Self {
        Self {
            bucket: None,
            buckets,
        }
    }

    /// Bucket list sent in the subscribe request. The single `bucket`, when
    /// set, goes after `buckets`.
    pub fn subscription_buckets(&self) -> Vec<String> {
        let mut buckets = self.buckets.clone();
        if let Some(bucket) = &self.bucket {
            buckets.push(bucket.clone());
        }
        buckets
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_none() && self.buckets.is_empty()
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Reconnecting,
    Closed,
}

/// Relay session with automatic reconnection.
pub struct RelaySession {
    config: RelayConfig,
    forwarder: Arc<dyn Forwarder>,
    sink: Arc<dyn StatusSink>,
    ready: Arc<ReadinessNotifier>,
    state: watch::Sender<SessionState>,
}

impl RelaySession {
    pub fn new(config: RelayConfig, forwarder: Arc<dyn Forwarder>, sink: Arc<dyn StatusSink>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            forwarder,
            sink,
            ready: Arc::new(ReadinessNotifier::new()),
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Notifier fired on every successful authentication.
    pub fn readiness(&self) -> Arc<ReadinessNotifier> {
        self.ready.clone()
    }

    /// Wait until the session has authenticated at least once.
    pub async fn ready(&self) -> bool {
        self.ready.wait_past(0).await.is_some()
    }

    /// Run until cancelled or the service rejects the credentials.
    ///
    /// Returns `Ok(())` on cancellation and [`RelayError::Unauthorized`] when
    /// authentication is refused. An empty filter is refused before dialing.
    pub async fn run(&self, filter: Filter, cancel: CancellationToken) -> RelayResult<()> {
        if filter.is_empty() {
            return Err(RelayError::InvalidFilter("no buckets to subscribe to".to_string()));
        }

        let tls = if self.config.insecure_skip_verify {
            Some(insecure_client_config()?)
        } else {
            None
        };
        let url = socket_url(&self.config.server_address);
        let buckets = filter.subscription_buckets();
        let pool = DispatchPool::start(&self.config.dispatch, self.forwarder.clone(), self.sink.clone());
        info!(url = %url, buckets = ?buckets, "Starting relay session");

        let mut backlog = VecDeque::new();
        let mut connection: Option<ActiveConnection> = None;
        let mut state = SessionState::Connecting;
        let result = loop {
            self.set_state(state);
            state = match state {
                SessionState::Disconnected | SessionState::Reconnecting => {
                    if let Some(mut conn) = connection.take() {
                        backlog.extend(conn.take_buffered_webhooks());
                        conn.close().await;
                    }
                    SessionState::Connecting
                }
                SessionState::Connecting => match self.connect(&url, tls.as_ref(), &cancel).await {
                    Some(conn) => {
                        connection = Some(conn);
                        SessionState::Authenticating
                    }
                    None => SessionState::Closed,
                },
                SessionState::Authenticating | SessionState::Subscribed => match connection.as_mut() {
                    Some(conn) => match self.step(conn, state, &buckets, &pool, &mut backlog, &cancel).await {
                        Ok(next) => next,
                        Err(e) => break Err(e),
                    },
                    None => SessionState::Connecting,
                },
                SessionState::Closed => break Ok(()),
            };
        };

        if let Some(conn) = connection.take() {
            conn.close().await;
        }
        if !backlog.is_empty() {
            warn!(dropped = backlog.len(), "Dropping webhooks that were never dispatched");
        }
        self.set_state(SessionState::Closed);
        drop(pool);
        info!("Relay session stopped");
        result
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Relay session state changed");
        }
    }

    /// Dial until connected and the auth request is written, or cancelled.
    async fn connect(
        &self,
        url: &str,
        tls: Option<&Arc<ClientConfig>>,
        cancel: &CancellationToken,
    ) -> Option<ActiveConnection> {
        loop {
            let dialed = tokio::select! {
                _ = cancel.cancelled() => return None,
                dialed = ActiveConnection::dial(url, tls, self.config.health_timeout) => dialed,
            };

            match dialed {
                Ok(mut conn) => {
                    let auth = ActionRequest::auth(&self.config.access_key, &self.config.access_secret);
                    match conn.send(&auth).await {
                        Ok(()) => {
                            info!(url = %url, "Connected to relay, authenticating");
                            return Some(conn);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to send auth request");
                            conn.close().await;
                        }
                    }
                }
                Err(e) => error!(error = %e, url = %url, "Relay connection failed, retrying"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Wait for the next thing to happen on a live connection.
    ///
    /// Webhooks wait in `backlog` while every worker is busy, so the socket
    /// keeps being read and pings keep being answered. Reading pauses only
    /// once the backlog is full.
    async fn step(
        &self,
        conn: &mut ActiveConnection,
        state: SessionState,
        buckets: &[String],
        pool: &DispatchPool,
        backlog: &mut VecDeque<Event>,
        cancel: &CancellationToken,
    ) -> RelayResult<SessionState> {
        let deadline = conn.health_deadline();
        let reading = backlog.len() < MAX_BACKLOG;
        let wake = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            slot = pool.reserve(), if !backlog.is_empty() => Wake::Slot(slot),
            signal = conn.next_signal(), if reading => Wake::Signal(signal),
            _ = sleep_until(deadline) => Wake::Expired,
        };

        match wake {
            Wake::Cancelled => Ok(SessionState::Closed),
            Wake::Slot(Ok(permit)) => {
                if let Some(event) = backlog.pop_front() {
                    permit.send(event);
                }
                Ok(state)
            }
            Wake::Slot(Err(e)) => {
                error!(error = %e, dropped = backlog.len(), "Failed to dispatch webhooks");
                backlog.clear();
                Ok(state)
            }
            Wake::Expired => {
                warn!(timeout = ?self.config.health_timeout, "No ping from relay, reconnecting");
                Ok(SessionState::Reconnecting)
            }
            Wake::Signal(Some(ReaderSignal::Frame(frame))) => {
                self.handle_frame(conn, state, frame, buckets, backlog).await
            }
            Wake::Signal(Some(ReaderSignal::Failed(e))) => {
                warn!(error = %e, "Relay read failed, reconnecting");
                Ok(SessionState::Reconnecting)
            }
            Wake::Signal(Some(ReaderSignal::Closed) | None) => {
                info!("Relay connection closed, reconnecting");
                Ok(SessionState::Reconnecting)
            }
        }
    }

    async fn handle_frame(
        &self,
        conn: &mut ActiveConnection,
        state: SessionState,
        frame: Frame,
        buckets: &[String],
        backlog: &mut VecDeque<Event>,
    ) -> RelayResult<SessionState> {
        match frame {
            Frame::Authenticated => {
                let sequence = self.ready.notify();
                info!(sequence, buckets = ?buckets, "Authenticated, subscribing");
                match conn.send(&ActionRequest::subscribe(buckets.to_vec())).await {
                    Ok(()) => Ok(SessionState::Subscribed),
                    Err(e) => {
                        error!(error = %e, "Failed to send subscribe request");
                        Ok(SessionState::Reconnecting)
                    }
                }
            }
            Frame::Unauthorized { message } => {
                error!(message = %message, "Authentication failed, check your access key and secret");
                Err(RelayError::Unauthorized(message))
            }
            Frame::Ping => {
                conn.reset_health(self.config.health_timeout);
                match conn.send(&ActionRequest::Pong).await {
                    Ok(()) => Ok(state),
                    Err(e) => {
                        warn!(error = %e, "Failed to answer ping");
                        Ok(SessionState::Reconnecting)
                    }
                }
            }
            Frame::Webhook(event) => {
                if event.meta.id.is_empty() {
                    warn!(bucket = %event.meta.bucket_name, "Webhook without id, status cannot be correlated");
                }
                debug!(
                    event_id = %event.meta.id,
                    bucket = %event.meta.bucket_name,
                    destination = %event.meta.output_destination,
                    backlog = backlog.len(),
                    "Webhook received"
                );
                backlog.push_back(*event);
                Ok(state)
            }
            Frame::Unrecognized(event) => {
                warn!(event_type = ?event.event_type, status = ?event.status, "Ignoring unrecognized relay frame");
                Ok(state)
            }
        }
    }
}

/// What woke the driver on a live connection.
enum Wake<'a> {
    Cancelled,
    Slot(RelayResult<Permit<'a, Event>>),
    Signal(Option<ReaderSignal>),
    Expired,
}
