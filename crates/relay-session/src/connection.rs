//! One live relay socket: dialing, the reader task and the write half.

use crate::tls::ensure_crypto_provider;
use crate::RelayResult;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_protocol_types::{ActionRequest, Event, Frame};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Path of the relay socket endpoint.
pub const SOCKET_PATH: &str = "/v1/socket";

const SIGNAL_BUFFER: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the reader task observed on the socket.
#[derive(Debug)]
pub(crate) enum ReaderSignal {
    Frame(Frame),
    Failed(String),
    Closed,
}

/// Socket URL for a configured server address.
///
/// `http(s)://` is mapped to `ws(s)://` and [`SOCKET_PATH`] is appended
/// unless the address already ends with it.
pub fn socket_url(server_address: &str) -> String {
    let base = server_address.trim_end_matches('/');
    let with_path = if base.ends_with(SOCKET_PATH) {
        base.to_string()
    } else {
        format!("{base}{SOCKET_PATH}")
    };

    if let Some(rest) = with_path.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = with_path.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        with_path
    }
}

/// An authenticated-or-authenticating socket owned by the session driver.
pub(crate) struct ActiveConnection {
    sink: SplitSink<WsStream, Message>,
    signals: mpsc::Receiver<ReaderSignal>,
    reader: JoinHandle<()>,
    health_deadline: Instant,
}

impl ActiveConnection {
    /// Dial `url`. `tls` replaces the default webpki-verified config for `wss`.
    pub(crate) async fn dial(
        url: &str,
        tls: Option<&Arc<ClientConfig>>,
        health_timeout: Duration,
    ) -> RelayResult<Self> {
        ensure_crypto_provider();
        let connector = tls.map(|config| Connector::Rustls(config.clone()));

        let (stream, _response) = connect_async_tls_with_config(url, None, false, connector).await?;
        let (sink, stream) = stream.split();
        let (signal_tx, signals) = mpsc::channel(SIGNAL_BUFFER);
        let reader = tokio::spawn(read_frames(stream, signal_tx));

        Ok(Self {
            sink,
            signals,
            reader,
            health_deadline: Instant::now() + health_timeout,
        })
    }

    pub(crate) async fn send(&mut self, request: &ActionRequest) -> RelayResult<()> {
        let json = request.to_json()?;
        self.sink.send(Message::Text(json.into())).await?;
        debug!(action = request.action(), "Sent relay action");
        Ok(())
    }

    /// Next reader signal; `None` once the reader is gone.
    pub(crate) async fn next_signal(&mut self) -> Option<ReaderSignal> {
        self.signals.recv().await
    }

    pub(crate) fn health_deadline(&self) -> Instant {
        self.health_deadline
    }

    pub(crate) fn reset_health(&mut self, health_timeout: Duration) {
        self.health_deadline = Instant::now() + health_timeout;
    }

    /// Webhooks the reader already decoded but the driver has not seen yet.
    pub(crate) fn take_buffered_webhooks(&mut self) -> Vec<Event> {
        let mut webhooks = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            if let ReaderSignal::Frame(Frame::Webhook(event)) = signal {
                webhooks.push(*event);
            }
        }
        webhooks
    }

    /// Stop the reader and close the socket. Never fails.
    pub(crate) async fn close(mut self) {
        self.reader.abort();
        match timeout(CLOSE_TIMEOUT, self.sink.close()).await {
            Ok(Ok(())) => debug!("Relay socket closed"),
            Ok(Err(e)) => debug!(error = %e, "Relay socket close failed"),
            Err(_) => debug!("Relay socket close timed out"),
        }
    }
}

/// Reader task: decode frames and pass them to the driver.
async fn read_frames(mut stream: SplitStream<WsStream>, signals: mpsc::Sender<ReaderSignal>) {
    while let Some(message) = stream.next().await {
        let decoded = match message {
            Ok(Message::Text(text)) => Event::from_json(text.as_str()),
            Ok(Message::Binary(data)) => serde_json::from_slice::<Event>(&data),
            Ok(Message::Close(frame)) => {
                info!(frame = ?frame, "Relay closed the connection");
                let _ = signals.send(ReaderSignal::Closed).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = signals.send(ReaderSignal::Failed(e.to_string())).await;
                return;
            }
        };

        match decoded {
            Ok(event) => {
                if signals.send(ReaderSignal::Frame(event.into_frame())).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Failed to decode relay frame"),
        }
    }

    let _ = signals.send(ReaderSignal::Closed).await;
}
