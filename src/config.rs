use crate::error::CliError;
use gatelink_client::{ClientInfo, ClientOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no shared token is configured
pub const TOKEN_ENV: &str = "GATELINK_GATEWAY_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway connection settings
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Directory holding the device identity and device tokens
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Full WebSocket URL; takes precedence over host/port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared bootstrap token (optional, can be loaded from env)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Seconds to wait for the handshake before giving up
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            state_dir: default_state_dir(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            token: None,
            password: None,
            role: default_role(),
            scopes: default_scopes(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    gatelink_client::config::default_state_dir()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18789
}

fn default_role() -> String {
    gatelink_client::roles::OPERATOR.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![gatelink_client::scopes::ADMIN.to_string()]
}

fn default_connect_timeout() -> u64 {
    10
}

impl Config {
    /// Load from `path`, or from the first default location that exists.
    /// Without an explicit path and without any file, defaults are used.
    pub fn load(path: &Option<String>) -> Result<Self, CliError> {
        let config_path = match path {
            Some(p) => {
                let p = PathBuf::from(p);
                if !p.exists() {
                    return Err(CliError::ConfigNotFound(p.display().to_string()));
                }
                p
            }
            None => {
                let default_paths = vec![
                    dirs::home_dir().map(|h| h.join(".gatelink/config.yaml")),
                    Some(PathBuf::from("./gatelink.yaml")),
                ];
                match default_paths.into_iter().flatten().find(|p| p.exists()) {
                    Some(p) => p,
                    None => {
                        tracing::debug!("no config file found, using defaults");
                        return Ok(Config::default());
                    }
                }
            }
        };

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::ConfigParseError(format!("read failed: {}", e)))?;

        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| CliError::ConfigParseError(format!("parse failed: {}", e)))?;

        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let content = serde_yml::to_string(self)
            .map_err(|e| CliError::ConfigParseError(format!("serialize failed: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content).map_err(CliError::IoError)?;

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn sample() -> Self {
        Config {
            gateway: GatewaySettings {
                token: Some("replace-with-gateway-token".to_string()),
                ..GatewaySettings::default()
            },
            state_dir: default_state_dir(),
        }
    }

    pub fn resolved_url(&self) -> String {
        match &self.gateway.url {
            Some(url) => url.clone(),
            None => format!("ws://{}:{}", self.gateway.host, self.gateway.port),
        }
    }

    pub fn to_client_options(&self) -> ClientOptions {
        let token = self
            .gateway
            .token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty());

        ClientOptions {
            token,
            password: self.gateway.password.clone(),
            client: ClientInfo {
                display_name: Some("gatelink".to_string()),
                mode: "cli".to_string(),
                ..ClientInfo::default()
            },
            role: self.gateway.role.clone(),
            scopes: self.gateway.scopes.clone(),
            state_dir: self.state_dir.clone(),
            ..ClientOptions::new(self.resolved_url())
        }
    }
}
