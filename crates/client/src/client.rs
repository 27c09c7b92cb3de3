// Gateway Connection
//
// Each `GatewayClient` is backed by one driver task that owns the transport,
// the pending request table, the event sequence counter, and every timer.
// Handles talk to the driver over a command channel; the driver publishes its
// state on a watch channel. Timers live inside the driver's phase, so leaving
// a phase cancels whatever it armed.
//
// Lifecycle:
//   Idle -> Opening -> AwaitingChallenge -> Authenticating -> Connected
//   any post-open phase --close--> Reconnecting --delay--> Opening
//   stop() from anywhere -> Closing -> Idle

use crate::auth::{normalize_role, normalize_scopes, select_auth_token, DeviceAuthPayload};
use crate::backoff::Backoff;
use crate::config::ClientOptions;
use crate::error::{ClientError, TransportError};
use crate::identity::DeviceIdentity;
use crate::presence::PresenceCache;
use crate::protocol::*;
use crate::tokens::DeviceTokenStore;
use crate::transport::{Connector, TransportEvent, TransportLink, WebSocketConnector};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

/// Externally visible connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Opening,
    AwaitingChallenge,
    Authenticating,
    Connected,
    Closing,
    Reconnecting { attempt: u32, delay: Duration },
}

/// Callbacks for connection-level activity.
///
/// Invoked from the driver task; implementations should return quickly.
pub trait GatewayListener: Send + Sync {
    /// Every server event except `connect.challenge`, in arrival order
    fn on_event(&self, _event: &EventFrame) {}

    fn on_hello_ok(&self, _hello: &HelloOk) {}

    /// Handshake rejected, malformed, or abandoned
    fn on_connect_error(&self, _error: &ClientError) {}

    fn on_close(&self, _code: u16, _reason: &str) {}

    /// `expected` is the seq that should have arrived, `received` the one that did
    fn on_gap(&self, _expected: u64, _received: u64) {}

    /// Transport failures, watchdog expiry, and exhausted reconnection
    fn on_error(&self, _error: &ClientError) {}
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl GatewayListener for NoopListener {}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip interim `{"status":"accepted"}` responses and wait for the final one
    pub expect_final: bool,
}

type RequestReply = oneshot::Sender<Result<JsonValue, ClientError>>;

enum Command {
    Start,
    Stop {
        done: oneshot::Sender<()>,
    },
    Request {
        method: String,
        params: JsonValue,
        options: RequestOptions,
        reply: RequestReply,
    },
}

/// Handle to a gateway connection
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    device_id: String,
    presence: PresenceCache,
    pub(crate) session_key: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("device_id", &self.device_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a client that connects over WebSocket.
    ///
    /// Loads (or creates) the device identity under `options.state_dir`.
    /// Must be called within a Tokio runtime.
    pub fn new(
        options: ClientOptions,
        listener: Arc<dyn GatewayListener>,
    ) -> Result<Self, ClientError> {
        Self::with_connector(options, Arc::new(WebSocketConnector), listener)
    }

    pub fn with_connector(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn GatewayListener>,
    ) -> Result<Self, ClientError> {
        let identity = DeviceIdentity::load_or_create(&options.identity_path())?;
        let tokens = DeviceTokenStore::new(options.token_store_path());
        let device_id = identity.device_id().to_string();
        let presence = PresenceCache::new();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            backoff: Backoff::new(options.reconnect.clone()),
            options,
            identity,
            tokens,
            connector,
            listener,
            presence: presence.clone(),
            commands: command_rx,
            state: state_tx,
            phase: Phase::Idle,
            opening: None,
            link: None,
            pending: HashMap::new(),
            last_seq: None,
            liveness: None,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            commands: command_tx,
            state: state_rx,
            device_id,
            presence,
            session_key: Arc::new(RwLock::new(None)),
        })
    }

    /// Begin connecting. Returns immediately; completion is reported through
    /// the listener and the state watch. Ignored unless the client is idle.
    pub fn start(&self) {
        if self.commands.send(Command::Start).is_err() {
            tracing::warn!("gateway driver is gone, start ignored");
        }
    }

    /// Close the connection, cancel timers, and reject every pending request
    /// with [`ClientError::Stopped`]. No reconnect follows.
    pub async fn stop(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Stop { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, ClientError> {
        self.request_with(method, params, RequestOptions::default())
            .await
    }

    /// Send a request and wait for its terminal response.
    ///
    /// Fails immediately with [`ClientError::NotConnected`] when no transport
    /// is open.
    pub async fn request_with(
        &self,
        method: &str,
        params: JsonValue,
        options: RequestOptions,
    ) -> Result<JsonValue, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                method: method.to_string(),
                params,
                options,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::Stopped)?;
        reply_rx.await.unwrap_or(Err(ClientError::Stopped))
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the handshake completes or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let connected = state.wait_for(|s| *s == ConnectionState::Connected);
        let result = match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Stopped),
            Err(_) => Err(ClientError::NotConnected),
        };
        result
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn presence(&self) -> &PresenceCache {
        &self.presence
    }
}

/// Driver-internal phase; carries the deadline armed on entry
#[derive(Debug)]
enum Phase {
    Idle,
    Opening,
    /// The phase itself is the latch: only the first of challenge or
    /// deadline finds it here.
    AwaitingChallenge {
        deadline: Instant,
    },
    Authenticating,
    Connected,
    Reconnecting {
        attempt: u32,
        delay: Duration,
        retry_at: Instant,
    },
}

impl Phase {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::AwaitingChallenge { deadline } => Some(*deadline),
            Phase::Reconnecting { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }

    fn public(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Idle,
            Phase::Opening => ConnectionState::Opening,
            Phase::AwaitingChallenge { .. } => ConnectionState::AwaitingChallenge,
            Phase::Authenticating => ConnectionState::Authenticating,
            Phase::Connected => ConnectionState::Connected,
            Phase::Reconnecting { attempt, delay, .. } => ConnectionState::Reconnecting {
                attempt: *attempt,
                delay: *delay,
            },
        }
    }
}

enum Reply {
    Caller(RequestReply),
    Handshake {
        role: String,
        clear_stored_on_failure: bool,
    },
}

struct PendingRequest {
    method: String,
    expect_final: bool,
    reply: Reply,
}

/// Tick watchdog
struct Liveness {
    interval: Duration,
    last_tick: Instant,
    check: Interval,
}

impl Liveness {
    fn new(interval: Duration) -> Self {
        let mut check = tokio::time::interval_at(Instant::now() + interval, interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            last_tick: Instant::now(),
            check,
        }
    }

    fn is_stale(&self) -> bool {
        self.last_tick.elapsed() > self.interval * 2
    }
}

type OpenResult = Result<TransportLink, TransportError>;

struct Driver {
    options: ClientOptions,
    identity: DeviceIdentity,
    tokens: DeviceTokenStore,
    connector: Arc<dyn Connector>,
    listener: Arc<dyn GatewayListener>,
    presence: PresenceCache,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    phase: Phase,
    opening: Option<oneshot::Receiver<OpenResult>>,
    link: Option<TransportLink>,
    pending: HashMap<String, PendingRequest>,
    last_seq: Option<u64>,
    backoff: Backoff,
    liveness: Option<Liveness>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let deadline = self.phase.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                result = open_result(&mut self.opening) => self.on_opened(result),
                event = next_event(&mut self.link) => self.handle_transport_event(event).await,
                _ = sleep_until(deadline) => self.on_deadline().await,
                _ = liveness_check(&mut self.liveness) => self.check_liveness().await,
            }
        }
        tracing::debug!("gateway driver exited");
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.state.send_replace(self.phase.public());
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop { done } => {
                self.shutdown();
                let _ = done.send(());
            }
            Command::Request {
                method,
                params,
                options,
                reply,
            } => self.send_request(method, params, options, reply),
        }
    }

    fn start(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            tracing::debug!("start ignored, gateway client already running");
            return;
        }
        self.backoff.reset();
        self.open();
    }

    fn shutdown(&mut self) {
        self.state.send_replace(ConnectionState::Closing);
        self.phase = Phase::Idle;
        self.opening = None;
        self.liveness = None;
        self.backoff.reset();

        let closed_link = self.link.take();
        if let Some(link) = &closed_link {
            link.close(close_codes::NORMAL, "client stopped");
        }
        self.flush_pending(&ClientError::Stopped);
        if closed_link.is_some() {
            self.listener.on_close(close_codes::NORMAL, "client stopped");
        }

        self.set_phase(Phase::Idle);
        tracing::info!("gateway client stopped");
    }

    fn open(&mut self) {
        self.set_phase(Phase::Opening);
        tracing::debug!(url = %self.options.url, "opening gateway transport");

        let connector = self.connector.clone();
        let url = self.options.url.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(connector.connect(&url).await);
        });
        self.opening = Some(rx);
    }

    fn on_opened(&mut self, result: OpenResult) {
        self.opening = None;
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.last_seq = None;
                let deadline = Instant::now() + self.options.challenge_timeout;
                self.set_phase(Phase::AwaitingChallenge { deadline });
                tracing::debug!("gateway transport open, awaiting challenge");
            }
            Err(e) => {
                tracing::warn!("gateway transport failed to open: {}", e);
                self.listener.on_error(&ClientError::Transport(e));
                self.schedule_reconnect();
            }
        }
    }

    async fn on_deadline(&mut self) {
        match self.phase {
            Phase::AwaitingChallenge { .. } => {
                tracing::debug!("no connect challenge received, connecting without nonce");
                self.send_connect(None).await;
            }
            Phase::Reconnecting { attempt, .. } => {
                tracing::info!(attempt, "reconnecting to gateway");
                self.open();
            }
            _ => {}
        }
    }

    async fn send_connect(&mut self, nonce: Option<String>) {
        if !matches!(self.phase, Phase::AwaitingChallenge { .. }) {
            return;
        }

        let device_id = self.identity.device_id().to_string();
        let role = normalize_role(&self.options.role);
        let scopes = normalize_scopes(&self.options.scopes);
        let stored = self.tokens.load(&device_id, &role);
        let selection = select_auth_token(stored.as_ref(), self.options.token.as_deref());

        let signed_at_ms = chrono::Utc::now().timestamp_millis();
        let payload = DeviceAuthPayload {
            device_id: &device_id,
            client_id: &self.options.client.id,
            client_mode: &self.options.client.mode,
            role: &role,
            scopes: &scopes,
            signed_at_ms,
            token: selection.token.as_deref(),
            nonce: nonce.as_deref(),
        }
        .build();
        let signature = self.identity.sign(&payload);

        let auth = if selection.token.is_some() || self.options.password.is_some() {
            Some(ConnectAuth {
                token: selection.token.clone(),
                password: self.options.password.clone(),
            })
        } else {
            None
        };

        let params = ConnectParams {
            min_protocol: self.options.min_protocol,
            max_protocol: self.options.max_protocol,
            client: self.options.client.clone(),
            caps: self.options.caps.clone(),
            role: role.clone(),
            scopes,
            auth,
            device: Some(DeviceAuth {
                id: device_id,
                public_key: self.identity.public_key_base64url(),
                signature,
                signed_at: signed_at_ms,
                nonce,
            }),
            locale: None,
            user_agent: Some(format!("gatelink/{}", env!("CARGO_PKG_VERSION"))),
        };

        let params = match serde_json::to_value(&params) {
            Ok(params) => params,
            Err(e) => {
                let err = ClientError::from(e);
                self.listener.on_connect_error(&err);
                self.close_transport(close_codes::POLICY_VIOLATION, "connect failed")
                    .await;
                return;
            }
        };

        let id = Uuid::new_v4().to_string();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: CONNECT_METHOD.to_string(),
                expect_final: false,
                reply: Reply::Handshake {
                    role,
                    clear_stored_on_failure: selection.clear_stored_on_failure,
                },
            },
        );
        self.set_phase(Phase::Authenticating);

        let frame = GatewayFrame::Request(RequestFrame::new(id, CONNECT_METHOD, params));
        if let Err(e) = self.send_frame(&frame) {
            tracing::warn!("failed to send connect: {}", e);
            self.close_transport(close_codes::ABNORMAL, "send failed")
                .await;
        }
    }

    fn send_request(
        &mut self,
        method: String,
        params: JsonValue,
        options: RequestOptions,
        reply: RequestReply,
    ) {
        if self.link.is_none() {
            let _ = reply.send(Err(ClientError::NotConnected));
            return;
        }

        let id = Uuid::new_v4().to_string();
        let frame = GatewayFrame::Request(RequestFrame::new(id.clone(), method.clone(), params));
        if let Err(e) = self.send_frame(&frame) {
            let _ = reply.send(Err(e));
            return;
        }

        tracing::debug!(id = %id, method = %method, "request sent");
        self.pending.insert(
            id,
            PendingRequest {
                method,
                expect_final: options.expect_final,
                reply: Reply::Caller(reply),
            },
        );
    }

    fn send_frame(&self, frame: &GatewayFrame) -> Result<(), ClientError> {
        let link = self.link.as_ref().ok_or(ClientError::NotConnected)?;
        let text = serde_json::to_string(frame)?;
        link.send_text(text)?;
        Ok(())
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_message(&text).await,
            TransportEvent::Error(message) => {
                tracing::warn!("gateway transport error: {}", message);
                self.listener
                    .on_error(&ClientError::Transport(TransportError::Io(message)));
            }
            TransportEvent::Closed { code, reason } => {
                self.link = None;
                self.on_transport_closed(code, reason).await;
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let frame: GatewayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("dropping malformed gateway frame: {}", e);
                return;
            }
        };

        match frame {
            GatewayFrame::Event(event) => self.handle_event(event).await,
            GatewayFrame::Response(response) => self.handle_response(response).await,
            GatewayFrame::Request(request) => {
                tracing::debug!(method = %request.method, "ignoring gateway-initiated request");
            }
        }
    }

    async fn handle_event(&mut self, event: EventFrame) {
        if let Some(seq) = event.seq {
            if let Some((expected, received)) = detect_gap(self.last_seq, seq) {
                tracing::warn!(expected, received, "gateway event gap");
                self.listener.on_gap(expected, received);
            } else if let Some(last) = self.last_seq.filter(|last| seq <= *last) {
                tracing::debug!(last, seq, "gateway event seq did not advance");
            }
            self.last_seq = Some(seq);
        }

        match event.event.as_str() {
            CHALLENGE_EVENT => {
                let nonce = event
                    .decode::<ConnectChallenge>()
                    .map(|c| c.nonce)
                    .filter(|n| !n.is_empty());
                match nonce {
                    Some(nonce) => self.send_connect(Some(nonce)).await,
                    None => tracing::debug!("connect challenge without nonce ignored"),
                }
                return;
            }
            TICK_EVENT => {
                if let Some(liveness) = self.liveness.as_mut() {
                    liveness.last_tick = Instant::now();
                }
            }
            SHUTDOWN_EVENT => match event.decode::<ShutdownEvent>() {
                Some(shutdown) => tracing::info!(
                    reason = %shutdown.reason,
                    restart_expected_ms = ?shutdown.restart_expected_ms,
                    "gateway announced shutdown"
                ),
                None => tracing::info!("gateway announced shutdown"),
            },
            PRESENCE_EVENT => {
                self.presence.apply_event(&event).await;
            }
            _ => {}
        }

        self.listener.on_event(&event);
    }

    async fn handle_response(&mut self, response: ResponseFrame) {
        let Some(pending) = self.pending.get(&response.id) else {
            tracing::debug!(id = %response.id, "response for unknown request");
            return;
        };
        if pending.expect_final && response.ok && response.status() == Some("accepted") {
            tracing::debug!(id = %response.id, method = %pending.method, "request accepted, awaiting final response");
            return;
        }
        let Some(pending) = self.pending.remove(&response.id) else {
            return;
        };

        match pending.reply {
            Reply::Caller(reply) => {
                let result = if response.ok {
                    Ok(response.payload.unwrap_or(JsonValue::Null))
                } else {
                    Err(ClientError::Request(response.error.unwrap_or_else(|| {
                        ErrorShape::new(ErrorShape::UNAVAILABLE, "request failed")
                    })))
                };
                let _ = reply.send(result);
            }
            Reply::Handshake {
                role,
                clear_stored_on_failure,
            } => {
                self.finish_handshake(response, role, clear_stored_on_failure)
                    .await
            }
        }
    }

    async fn finish_handshake(
        &mut self,
        response: ResponseFrame,
        role: String,
        clear_stored_on_failure: bool,
    ) {
        let device_id = self.identity.device_id().to_string();

        if !response.ok {
            let shape = response
                .error
                .unwrap_or_else(|| ErrorShape::new(ErrorShape::UNAUTHORIZED, "connect failed"));
            let err = ClientError::Authentication(shape);
            tracing::warn!("gateway handshake rejected: {}", err);
            if clear_stored_on_failure {
                if let Err(e) = self.tokens.clear(&device_id, &role) {
                    tracing::warn!("failed to clear device token: {}", e);
                }
            }
            self.listener.on_connect_error(&err);
            self.close_transport(close_codes::POLICY_VIOLATION, "connect failed")
                .await;
            return;
        }

        let hello: HelloOk =
            match serde_json::from_value(response.payload.unwrap_or(JsonValue::Null)) {
                Ok(hello) => hello,
                Err(e) => {
                    let err = ClientError::Protocol(format!("invalid hello-ok: {}", e));
                    tracing::warn!("{}", err);
                    self.listener.on_connect_error(&err);
                    self.close_transport(close_codes::POLICY_VIOLATION, "connect failed")
                        .await;
                    return;
                }
            };

        if let Some(auth) = &hello.auth {
            let token_role = auth.role.as_deref().unwrap_or(&role);
            if let Err(e) =
                self.tokens
                    .store(&device_id, token_role, &auth.device_token, &auth.scopes)
            {
                tracing::warn!("failed to persist device token: {}", e);
            }
        }

        self.backoff.reset();
        let tick_interval = hello
            .policy
            .as_ref()
            .map(|p| Duration::from_millis(p.tick_interval_ms))
            .filter(|d| !d.is_zero())
            .unwrap_or(self.options.default_tick_interval);
        self.liveness = Some(Liveness::new(tick_interval));
        self.presence.seed(&hello.snapshot).await;
        self.set_phase(Phase::Connected);

        tracing::info!(
            protocol = hello.protocol,
            server = %hello.server.version,
            tick_interval_ms = tick_interval.as_millis() as u64,
            "connected to gateway"
        );
        self.listener.on_hello_ok(&hello);
    }

    async fn check_liveness(&mut self) {
        let Some(liveness) = &self.liveness else {
            return;
        };
        if !liveness.is_stale() {
            return;
        }
        tracing::warn!(
            silent_ms = liveness.last_tick.elapsed().as_millis() as u64,
            "gateway tick watchdog expired"
        );
        self.listener.on_error(&ClientError::Liveness);
        self.close_transport(close_codes::TICK_TIMEOUT, "tick timeout")
            .await;
    }

    /// Close the transport from this side and run the closure path.
    async fn close_transport(&mut self, code: u16, reason: &str) {
        if let Some(link) = self.link.take() {
            link.close(code, reason);
        }
        self.on_transport_closed(code, reason.to_string()).await;
    }

    async fn on_transport_closed(&mut self, code: u16, reason: String) {
        self.link = None;
        self.liveness = None;
        tracing::info!(
            code,
            reason = %reason,
            hint = describe_close_code(code).unwrap_or("unknown"),
            "gateway connection closed"
        );

        self.flush_pending(&ClientError::Closed {
            code,
            reason: reason.clone(),
        });
        self.listener.on_close(code, &reason);

        if matches!(self.phase, Phase::Idle) {
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some((attempt, delay)) => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling gateway reconnect"
                );
                self.set_phase(Phase::Reconnecting {
                    attempt,
                    delay,
                    retry_at: Instant::now() + delay,
                });
            }
            None => {
                let attempts = self.backoff.max_attempts();
                tracing::error!(attempts, "giving up on gateway reconnect");
                self.set_phase(Phase::Idle);
                self.listener
                    .on_error(&ClientError::ReconnectExhausted { attempts });
            }
        }
    }

    fn flush_pending(&mut self, error: &ClientError) {
        for (_, pending) in self.pending.drain() {
            match pending.reply {
                Reply::Caller(reply) => {
                    let _ = reply.send(Err(error.clone()));
                }
                Reply::Handshake { .. } => self.listener.on_connect_error(error),
            }
        }
    }
}

/// `(expected, received)` when `seq` skips past the one following `last`.
fn detect_gap(last: Option<u64>, seq: u64) -> Option<(u64, u64)> {
    let expected = last?.checked_add(1)?;
    (seq > expected).then_some((expected, seq))
}

async fn open_result(opening: &mut Option<oneshot::Receiver<OpenResult>>) -> OpenResult {
    match opening {
        Some(rx) => rx
            .await
            .unwrap_or_else(|_| Err(TransportError::Connect("connect task aborted".to_string()))),
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.recv().await.unwrap_or(TransportEvent::Closed {
            code: close_codes::ABNORMAL,
            reason: "transport dropped".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn liveness_check(liveness: &mut Option<Liveness>) {
    match liveness {
        Some(liveness) => {
            liveness.check.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_deadlines() {
        let now = Instant::now();
        assert_eq!(
            Phase::AwaitingChallenge { deadline: now }.deadline(),
            Some(now)
        );
        assert_eq!(Phase::Connected.deadline(), None);
        assert_eq!(Phase::Idle.deadline(), None);
    }

    #[test]
    fn test_phase_public_state() {
        let phase = Phase::Reconnecting {
            attempt: 3,
            delay: Duration::from_secs(4),
            retry_at: Instant::now(),
        };
        assert_eq!(
            phase.public(),
            ConnectionState::Reconnecting {
                attempt: 3,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(Phase::Authenticating.public(), ConnectionState::Authenticating);
    }

    #[test]
    fn test_detect_gap() {
        assert_eq!(detect_gap(None, 7), None);
        assert_eq!(detect_gap(Some(1), 2), None);
        assert_eq!(detect_gap(Some(2), 5), Some((3, 5)));
        assert_eq!(detect_gap(Some(5), 3), None);
        assert_eq!(detect_gap(Some(u64::MAX), 1), None);
        assert_eq!(detect_gap(Some(u64::MAX), u64::MAX), None);
        assert_eq!(detect_gap(Some(u64::MAX - 2), u64::MAX), Some((u64::MAX - 1, u64::MAX)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_staleness() {
        let liveness = Liveness::new(Duration::from_secs(1));
        assert!(!liveness.is_stale());
        tokio::time::advance(Duration::from_millis(2001)).await;
        assert!(liveness.is_stale());
    }
}
