// Test gateway: an in-memory connector plus a listener that records callbacks.

#![allow(dead_code)]

use async_trait::async_trait;
use gatelink_client::transport::Outbound;
use gatelink_client::{
    ClientError, ClientOptions, Connector, EventFrame, GatewayClient, GatewayListener, HelloOk,
    TransportError, TransportLink, TransportPeer,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct MockConnector {
    peers: mpsc::UnboundedSender<TransportPeer>,
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<TransportLink, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        let (link, peer) = TransportLink::pair();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

#[derive(Debug, Clone)]
pub enum Seen {
    Event(EventFrame),
    HelloOk(HelloOk),
    ConnectError(ClientError),
    Close(u16, String),
    Gap(u64, u64),
    Error(ClientError),
}

pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Seen>,
}

impl GatewayListener for RecordingListener {
    fn on_event(&self, event: &EventFrame) {
        let _ = self.tx.send(Seen::Event(event.clone()));
    }

    fn on_hello_ok(&self, hello: &HelloOk) {
        let _ = self.tx.send(Seen::HelloOk(hello.clone()));
    }

    fn on_connect_error(&self, error: &ClientError) {
        let _ = self.tx.send(Seen::ConnectError(error.clone()));
    }

    fn on_close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Seen::Close(code, reason.to_string()));
    }

    fn on_gap(&self, expected: u64, received: u64) {
        let _ = self.tx.send(Seen::Gap(expected, received));
    }

    fn on_error(&self, error: &ClientError) {
        let _ = self.tx.send(Seen::Error(error.clone()));
    }
}

pub struct Harness {
    pub client: GatewayClient,
    pub connector: Arc<MockConnector>,
    pub peers: mpsc::UnboundedReceiver<TransportPeer>,
    pub seen: mpsc::UnboundedReceiver<Seen>,
    pub options: ClientOptions,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    pub fn with_options(configure: impl FnOnce(ClientOptions) -> ClientOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = configure(ClientOptions::new("ws://gateway.test").with_state_dir(dir.path()));

        let (peer_tx, peers) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            peers: peer_tx,
            refuse: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        });
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let listener = Arc::new(RecordingListener { tx: seen_tx });

        let client =
            GatewayClient::with_connector(options.clone(), connector.clone(), listener).unwrap();

        Self {
            client,
            connector,
            peers,
            seen,
            options,
            _dir: dir,
        }
    }

    pub async fn next_peer(&mut self) -> TransportPeer {
        self.peers.recv().await.expect("connector dropped")
    }

    pub async fn next_seen(&mut self) -> Seen {
        self.seen.recv().await.expect("listener dropped")
    }

    /// Drop recorded callbacks up to now.
    pub fn drain_seen(&mut self) {
        while self.seen.try_recv().is_ok() {}
    }

    /// Start the client and complete a challenged handshake.
    pub async fn connect(&mut self, tick_interval_ms: u64) -> TransportPeer {
        self.client.start();
        let mut peer = self.next_peer().await;
        send_challenge(&peer, "abc");
        let connect = expect_request(&mut peer, "connect").await;
        reply_ok(&peer, &connect, hello_ok(Some("T1"), tick_interval_ms));
        self.client
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();
        self.drain_seen();
        peer
    }
}

pub fn send_challenge(peer: &TransportPeer, nonce: &str) {
    peer.send_json(&json!({
        "type": "event",
        "event": "connect.challenge",
        "payload": { "nonce": nonce, "ts": 1_700_000_000_000u64 }
    }));
}

/// Next outbound frame, asserted to be a request for `method`.
pub async fn expect_request(peer: &mut TransportPeer, method: &str) -> Value {
    let frame = peer.recv_json().await.expect("client closed the link");
    assert_eq!(frame["type"], "req", "unexpected frame: {}", frame);
    assert_eq!(frame["method"], method, "unexpected frame: {}", frame);
    frame
}

pub fn reply_ok(peer: &TransportPeer, request: &Value, payload: Value) {
    peer.send_json(&json!({
        "type": "res",
        "id": request["id"],
        "ok": true,
        "payload": payload
    }));
}

pub fn reply_error(peer: &TransportPeer, request: &Value, code: &str, message: &str) {
    peer.send_json(&json!({
        "type": "res",
        "id": request["id"],
        "ok": false,
        "error": { "code": code, "message": message }
    }));
}

pub fn event(name: &str, seq: Option<u64>, payload: Value) -> Value {
    let mut frame = json!({ "type": "event", "event": name, "payload": payload });
    if let Some(seq) = seq {
        frame["seq"] = json!(seq);
    }
    frame
}

pub fn hello_ok(token: Option<&str>, tick_interval_ms: u64) -> Value {
    let mut hello = json!({
        "type": "hello-ok",
        "protocol": 3,
        "server": { "version": "test", "connId": "conn-1" },
        "features": { "methods": ["chat.send", "sessions.list"], "events": ["tick", "presence"] },
        "snapshot": {
            "presence": [{ "host": "gateway-host", "mode": "gateway", "ts": 1 }],
            "stateVersion": { "presence": 1 }
        },
        "policy": {
            "maxPayload": 524288,
            "maxBufferedBytes": 1572864,
            "tickIntervalMs": tick_interval_ms
        }
    });
    if let Some(token) = token {
        hello["auth"] = json!({ "deviceToken": token, "scopes": ["operator.admin"] });
    }
    hello
}

/// Next command that is a close, skipping text frames.
pub async fn expect_close(peer: &mut TransportPeer) -> (u16, String) {
    loop {
        match peer.recv().await.expect("client dropped the link without closing") {
            Outbound::Close { code, reason } => return (code, reason),
            Outbound::Text(_) => continue,
        }
    }
}
