// Gateway WebSocket Protocol
//
// Frame types exchanged with the gateway as JSON text messages.
//
// Protocol flow:
// 1. Gateway may push a "connect.challenge" event carrying a nonce
// 2. Client sends a "connect" request signed with its device identity
// 3. Gateway answers with a "hello-ok" payload (and possibly a device token)
// 4. Bi-directional request/response traffic plus server-pushed events
//
// Method payloads stay as raw JSON at the envelope level; the call site that
// knows the expected shape decodes them.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const PROTOCOL_VERSION: u32 = 3;

pub const CONNECT_METHOD: &str = "connect";
pub const CHALLENGE_EVENT: &str = "connect.challenge";
pub const TICK_EVENT: &str = "tick";
pub const PRESENCE_EVENT: &str = "presence";
pub const SHUTDOWN_EVENT: &str = "shutdown";

pub const MAX_PAYLOAD_BYTES: usize = 524_288;
pub const MAX_BUFFERED_BYTES: usize = 1_572_864;
pub const TICK_INTERVAL_MS: u64 = 30_000;

/// WebSocket close codes seen on gateway connections.
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame arrived without a status code.
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const SERVICE_RESTART: u16 = 1012;
    /// Local code used when the tick watchdog gives up on a silent connection.
    pub const TICK_TIMEOUT: u16 = 4000;
}

/// Human-readable hint for a close code. Diagnostics only.
pub fn describe_close_code(code: u16) -> Option<&'static str> {
    match code {
        close_codes::NORMAL => Some("normal closure"),
        close_codes::GOING_AWAY => Some("going away"),
        close_codes::NO_STATUS => Some("no status received"),
        close_codes::ABNORMAL => Some("abnormal closure (no close frame)"),
        close_codes::POLICY_VIOLATION => Some("policy violation"),
        close_codes::INTERNAL_ERROR => Some("internal server error"),
        close_codes::SERVICE_RESTART => Some("service restart"),
        close_codes::TICK_TIMEOUT => Some("tick timeout"),
        _ => None,
    }
}

pub mod roles {
    pub const OPERATOR: &str = "operator";
    pub const NODE: &str = "node";
}

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
    pub const APPROVALS: &str = "operator.approvals";
    pub const PAIRING: &str = "operator.pairing";
}

/// Gateway frame - top-level message type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrame),

    #[serde(rename = "res")]
    Response(ResponseFrame),

    #[serde(rename = "event")]
    Event(EventFrame),
}

/// Request frame from client to gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Unique among the requests outstanding on one connection
    pub id: String,

    /// Method name (e.g., "connect", "chat.send", "sessions.list")
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: if params.is_null() { None } else { Some(params) },
        }
    }
}

/// Response frame from gateway to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Request ID being responded to
    pub id: String,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// `payload.status`, used to recognise interim "accepted" acknowledgements.
    pub fn status(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(JsonValue::as_str)
    }
}

/// Error body carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    pub code: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorShape {
    // Standard error codes
    pub const INVALID_REQUEST: &'static str = "INVALID_REQUEST";
    pub const NOT_PAIRED: &'static str = "NOT_PAIRED";
    pub const UNAVAILABLE: &'static str = "UNAVAILABLE";
    pub const UNAUTHORIZED: &'static str = "UNAUTHORIZED";
    pub const NOT_FOUND: &'static str = "NOT_FOUND";
    pub const INTERNAL_ERROR: &'static str = "INTERNAL_ERROR";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retryable(mut self, retry_after_ms: u64) -> Self {
        self.retryable = Some(true);
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Event frame pushed by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,

    /// Per-connection, monotonically increasing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            seq: None,
            state_version: None,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Decode the payload into a method-specific shape.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.payload
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
    }
}

/// State version for delta tracking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<u64>,
}

/// Payload of the `connect.challenge` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectChallenge {
    pub nonce: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

/// Shutdown event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownEvent {
    pub reason: String,

    /// Expected restart time (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_expected_ms: Option<u64>,
}

/// Parameters of the initial `connect` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Client descriptor sent in the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub version: String,

    /// Platform (macos, linux, windows)
    pub platform: String,

    /// Client mode (backend, cli, ui, node)
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: "gateway-client".to_string(),
            display_name: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "backend".to_string(),
            instance_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Device proof attached to `connect`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuth {
    pub id: String,

    /// Raw ed25519 public key, base64url
    pub public_key: String,

    /// Signature over the device auth payload, base64url
    pub signature: String,

    /// Milliseconds since the Unix epoch
    pub signed_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Hello-ok payload (response to connect request)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type", default = "HelloOk::default_type")]
    pub kind: String,

    /// Negotiated protocol version
    pub protocol: u32,

    #[serde(default)]
    pub server: ServerInfo,

    #[serde(default)]
    pub features: Features,

    /// Presence/state snapshot, kept opaque apart from the presence cache
    #[serde(default)]
    pub snapshot: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GatewayPolicy>,
}

impl HelloOk {
    fn default_type() -> String {
        "hello-ok".to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

/// Methods and events the gateway supports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub events: Vec<String>,
}

/// Device token issued by the gateway on a successful handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    pub device_token: String,

    /// Falls back to the requested role when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<u64>,
}

/// Gateway policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPolicy {
    #[serde(default = "GatewayPolicy::default_max_payload")]
    pub max_payload: usize,

    #[serde(default = "GatewayPolicy::default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,

    /// Tick interval (milliseconds); 0 when not advertised
    #[serde(default)]
    pub tick_interval_ms: u64,
}

impl GatewayPolicy {
    fn default_max_payload() -> usize {
        MAX_PAYLOAD_BYTES
    }

    fn default_max_buffered_bytes() -> usize {
        MAX_BUFFERED_BYTES
    }
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_BYTES,
            max_buffered_bytes: MAX_BUFFERED_BYTES,
            tick_interval_ms: TICK_INTERVAL_MS,
        }
    }
}

/// Presence entry - device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// Hostname or device identifier
    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_family: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Last input time (seconds ago)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_input_seconds: Option<u64>,

    #[serde(default)]
    pub ts: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}
