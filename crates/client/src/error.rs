//! Error types for the gateway client.
//!
//! - `IdentityError`: device identity storage and key material, fatal at startup
//! - `TokenStoreError`: persisting or clearing device tokens
//! - `TransportError`: opening, writing to, or losing the transport
//! - `ClientError`: everything surfaced to callers of `GatewayClient`

use crate::protocol::ErrorShape;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("identity record unusable: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("gateway rejected connect: {0}")]
    Authentication(ErrorShape),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request failed: {0}")]
    Request(ErrorShape),
    #[error("gateway tick timeout")]
    Liveness,
    #[error("gateway closed ({code}): {reason}")]
    Closed { code: u16, reason: String },
    #[error("gateway not connected")]
    NotConnected,
    #[error("gateway client stopped")]
    Stopped,
    #[error("gateway reconnect abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("device identity: {0}")]
    Identity(String),
    #[error("json error: {0}")]
    Json(String),
}

impl ClientError {
    /// Whether the failure is expected to clear up on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Liveness | Self::Closed { .. } | Self::NotConnected => true,
            Self::Request(shape) => shape.retryable.unwrap_or(false),
            _ => false,
        }
    }

    /// The gateway error code for request and authentication failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Request(shape) | Self::Authentication(shape) => Some(shape.code.as_str()),
            _ => None,
        }
    }
}

impl From<IdentityError> for ClientError {
    fn from(err: IdentityError) -> Self {
        Self::Identity(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
