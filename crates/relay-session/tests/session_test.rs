//! Session tests against an in-process fake relay service.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_protocol_types::{ActionRequest, Event, EventStatus};
use relay_session::{
    CancellationToken, DispatchConfig, Filter, RelayConfig, RelayError, RelaySession,
    SessionState, StatusSink,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use webhook_forwarder::{DefaultForwarder, Forwarder, ForwarderConfig};
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

struct ChannelSink(mpsc::UnboundedSender<EventStatus>);

#[async_trait]
impl StatusSink for ChannelSink {
    async fn report(&self, status: &EventStatus) {
        let _ = self.0.send(status.clone());
    }
}

struct Harness {
    session: Arc<RelaySession>,
    cancel: CancellationToken,
    statuses: mpsc::UnboundedReceiver<EventStatus>,
}

fn relay_config(server_address: String, health_timeout: Duration) -> RelayConfig {
    RelayConfig {
        server_address,
        access_key: "my-key".to_string(),
        access_secret: "my-secret".to_string(),
        health_timeout,
        reconnect_delay: Duration::from_millis(50),
        dispatch: DispatchConfig {
            workers: 4,
            queue_capacity: 1,
        },
        ..RelayConfig::default()
    }
}

fn harness(server_address: String, health_timeout: Duration) -> Harness {
    let forwarder = DefaultForwarder::new(ForwarderConfig {
        retries: 0,
        ..ForwarderConfig::default()
    })
    .unwrap();
    harness_with(relay_config(server_address, health_timeout), Arc::new(forwarder))
}

fn harness_with(config: RelayConfig, forwarder: Arc<dyn Forwarder>) -> Harness {
    let (tx, statuses) = mpsc::unbounded_channel();
    Harness {
        session: Arc::new(RelaySession::new(config, forwarder, Arc::new(ChannelSink(tx)))),
        cancel: CancellationToken::new(),
        statuses,
    }
}

/// Forwarder that takes `delay` per webhook and always succeeds.
struct SlowForwarder {
    delay: Duration,
}

#[async_trait]
impl Forwarder for SlowForwarder {
    async fn forward(&self, event: Event) -> EventStatus {
        tokio::time::sleep(self.delay).await;
        EventStatus {
            id: event.meta.id,
            status_code: 200,
            retries: 0,
            message: String::new(),
        }
    }
}

fn spawn_run(h: &Harness, filter: Filter) -> JoinHandle<Result<(), RelayError>> {
    let session = h.session.clone();
    let cancel = h.cancel.clone();
    tokio::spawn(async move { session.run(filter, cancel).await })
}

fn buckets(names: &[&str]) -> Filter {
    Filter::new(names.iter().map(|s| s.to_string()).collect())
}

/// Accept one socket and report the request path it was opened on.
async fn accept(listener: &TcpListener) -> (ServerSocket, String) {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let (path_tx, path_rx) = oneshot::channel();
    let socket = accept_hdr_async(tcp, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let _ = path_tx.send(req.uri().path().to_string());
        Ok(resp)
    })
    .await
    .unwrap();
    (socket, path_rx.await.unwrap())
}

async fn recv_action(socket: &mut ServerSocket) -> ActionRequest {
    loop {
        let message = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = message {
            return ActionRequest::from_json(text.as_str()).unwrap();
        }
    }
}

async fn send_json(socket: &mut ServerSocket, value: serde_json::Value) {
    socket.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn send_status(socket: &mut ServerSocket, status: &str) {
    send_json(socket, json!({"type": "status", "status": status})).await;
}

/// Auth, authenticated, subscribe. Returns the subscribed buckets.
async fn handshake(socket: &mut ServerSocket) -> Vec<String> {
    assert_eq!(
        recv_action(socket).await,
        ActionRequest::Auth {
            key: "my-key".to_string(),
            secret: "my-secret".to_string(),
        }
    );
    send_status(socket, "authenticated").await;
    match recv_action(socket).await {
        ActionRequest::Subscribe { buckets } => buckets,
        other => panic!("expected subscribe, got {other:?}"),
    }
}

async fn wait_for_state(session: &RelaySession, wanted: SessionState) {
    let mut states = session.watch_state();
    timeout(WAIT, states.wait_for(|s| *s == wanted))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn subscribes_and_forwards_webhook() {
    let destination = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .and(body_string("foo"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&destination)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let mut h = harness(address, Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, request_path) = accept(&listener).await;
    assert_eq!(request_path, "/v1/socket");
    assert_eq!(handshake(&mut socket).await, vec!["b1"]);
    wait_for_state(&h.session, SessionState::Subscribed).await;

    send_json(
        &mut socket,
        json!({
            "type": "webhook",
            "meta": {
                "id": "evt-1",
                "bucked_id": "bucket-1",
                "bucket_name": "b1",
                "output_destination": format!("{}/webhook", destination.uri()),
            },
            "headers": {"Content-Type": ["text/plain"]},
            "query": "",
            "body": "foo",
            "method": "POST",
        }),
    )
    .await;

    let status = timeout(WAIT, h.statuses.recv()).await.unwrap().unwrap();
    assert_eq!(status.id, "evt-1");
    assert_eq!(status.status_code, 200);
    assert_eq!(status.retries, 0);
    assert!(status.message.is_empty());

    // Nothing else was sent: one auth, one subscribe.
    assert!(timeout(Duration::from_millis(100), socket.next()).await.is_err());

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn keeps_dialing_until_server_appears() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let h = harness(format!("http://{addr}"), Duration::from_secs(30));
    let filter = Filter {
        bucket: Some("single".to_string()),
        buckets: vec!["a".to_string(), "b".to_string()],
    };
    let run = spawn_run(&h, filter);

    // Let a few dials fail first.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.session.state(), SessionState::Connecting);

    let listener = TcpListener::bind(addr).await.unwrap();
    let (mut socket, _) = accept(&listener).await;
    assert_eq!(handshake(&mut socket).await, vec!["a", "b", "single"]);
    wait_for_state(&h.session, SessionState::Subscribed).await;

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn pings_keep_connection_alive() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_millis(400));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    handshake(&mut socket).await;

    // Well past the health timeout in total, never longer than it between pings.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        send_status(&mut socket, "ping").await;
        assert_eq!(recv_action(&mut socket).await, ActionRequest::Pong);
    }

    assert_eq!(h.session.state(), SessionState::Subscribed);
    assert!(timeout(Duration::from_millis(50), listener.accept()).await.is_err());

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn pings_are_answered_while_workers_are_busy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let config = RelayConfig {
        dispatch: DispatchConfig {
            workers: 1,
            queue_capacity: 1,
        },
        ..relay_config(address, Duration::from_millis(400))
    };
    let mut h = harness_with(
        config,
        Arc::new(SlowForwarder {
            delay: Duration::from_millis(700),
        }),
    );
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    handshake(&mut socket).await;

    // More webhooks than one worker and a one-slot queue can take at once.
    for i in 0..4 {
        send_json(
            &mut socket,
            json!({
                "type": "webhook",
                "meta": {"id": format!("evt-{i}"), "output_destination": "http://127.0.0.1:1/"},
                "body": "x",
                "method": "POST",
            }),
        )
        .await;
    }

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        send_status(&mut socket, "ping").await;
        assert_eq!(recv_action(&mut socket).await, ActionRequest::Pong);
    }

    assert_eq!(h.session.state(), SessionState::Subscribed);
    assert!(timeout(Duration::from_millis(50), listener.accept()).await.is_err());

    // Keep the connection healthy while the backlog drains.
    let mut delivered = Vec::new();
    while delivered.len() < 4 {
        tokio::select! {
            status = h.statuses.recv() => delivered.push(status.unwrap().id),
            _ = tokio::time::sleep(Duration::from_millis(150)) => {
                send_status(&mut socket, "ping").await;
                assert_eq!(recv_action(&mut socket).await, ActionRequest::Pong);
            }
        }
    }
    delivered.sort();
    assert_eq!(delivered, vec!["evt-0", "evt-1", "evt-2", "evt-3"]);
    assert!(timeout(Duration::from_millis(50), listener.accept()).await.is_err());

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn insecure_session_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let forwarder = DefaultForwarder::new(ForwarderConfig::default()).unwrap();
    let config = RelayConfig {
        insecure_skip_verify: true,
        ..relay_config(address, Duration::from_secs(30))
    };
    let h = harness_with(config, Arc::new(forwarder));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    assert_eq!(handshake(&mut socket).await, vec!["b1"]);

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn missing_ping_reconnects_and_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_millis(200));
    let run = spawn_run(&h, buckets(&["b1", "b2"]));

    let (mut first, _) = accept(&listener).await;
    assert_eq!(handshake(&mut first).await, vec!["b1", "b2"]);

    // Stay silent; the session should give up on this socket and dial again.
    let (mut second, _) = accept(&listener).await;
    assert_eq!(handshake(&mut second).await, vec!["b1", "b2"]);
    assert_eq!(h.session.readiness().sequence(), 2);

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn server_close_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut first, _) = accept(&listener).await;
    handshake(&mut first).await;
    first.close(None).await.unwrap();

    let (mut second, _) = accept(&listener).await;
    assert_eq!(handshake(&mut second).await, vec!["b1"]);

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn dropped_socket_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut first, _) = accept(&listener).await;
    handshake(&mut first).await;
    drop(first);

    let (mut second, _) = accept(&listener).await;
    assert_eq!(handshake(&mut second).await, vec!["b1"]);

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unauthorized_ends_the_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    recv_action(&mut socket).await;
    send_json(
        &mut socket,
        json!({"type": "status", "status": "unauthorized", "message": "bad key"}),
    )
    .await;

    let result = timeout(WAIT, run).await.unwrap().unwrap();
    match result {
        Err(RelayError::Unauthorized(message)) => assert_eq!(message, "bad key"),
        other => panic!("expected unauthorized, got {other:?}"),
    }
    assert_eq!(h.session.state(), SessionState::Closed);
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_ignored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    handshake(&mut socket).await;

    socket.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut socket, json!({"type": "presence"})).await;
    send_status(&mut socket, "maintenance").await;
    send_status(&mut socket, "ping").await;
    assert_eq!(recv_action(&mut socket).await, ActionRequest::Pong);
    assert_eq!(h.session.state(), SessionState::Subscribed);

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn ready_resolves_after_authentication() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let h = harness(address, Duration::from_secs(30));

    let session = h.session.clone();
    let ready = tokio::spawn(async move { session.ready().await });
    let run = spawn_run(&h, buckets(&["b1"]));

    let (mut socket, _) = accept(&listener).await;
    recv_action(&mut socket).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ready.is_finished());

    send_status(&mut socket, "authenticated").await;
    assert!(timeout(WAIT, ready).await.unwrap().unwrap());

    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn cancel_while_dialing_returns_ok() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let h = harness(format!("http://{addr}"), Duration::from_secs(30));
    let run = spawn_run(&h, buckets(&["b1"]));

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.cancel.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn empty_filter_is_rejected() {
    let h = harness("http://127.0.0.1:1".to_string(), Duration::from_secs(30));
    let result = h.session.run(Filter::default(), h.cancel.clone()).await;
    assert!(matches!(result, Err(RelayError::InvalidFilter(_))));
}
