// Gateway Client Options

use crate::backoff::ReconnectPolicy;
use crate::protocol::{roles, scopes, ClientInfo, PROTOCOL_VERSION, TICK_INTERVAL_MS};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// How long to wait for `connect.challenge` before connecting without a nonce
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_millis(750);

/// Gateway connection configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,

    /// Shared bootstrap token, used when no device token is stored
    pub token: Option<String>,

    pub password: Option<String>,

    pub client: ClientInfo,

    pub role: String,

    pub scopes: Vec<String>,

    pub min_protocol: u32,
    pub max_protocol: u32,

    pub caps: Vec<String>,

    /// Root for `identity/device.json` and `identity/device-auth.json`
    pub state_dir: PathBuf,

    pub challenge_timeout: Duration,

    pub reconnect: ReconnectPolicy,

    /// Tick interval assumed when the gateway does not advertise one
    pub default_tick_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            password: None,
            client: ClientInfo::default(),
            role: roles::OPERATOR.to_string(),
            scopes: vec![scopes::ADMIN.to_string()],
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            caps: Vec::new(),
            state_dir: default_state_dir(),
            challenge_timeout: CHALLENGE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            default_tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
        }
    }
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn identity_path(&self) -> PathBuf {
        self.state_dir.join("identity").join("device.json")
    }

    pub fn token_store_path(&self) -> PathBuf {
        self.state_dir.join("identity").join("device-auth.json")
    }
}

/// `~/.gatelink`, or `./.gatelink` when no home directory is known
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gatelink")
}
