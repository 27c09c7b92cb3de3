// Gatelink Gateway Client
//
// Client side of the gateway WebSocket protocol: device identity, signed
// connect handshake, request/response multiplexing, event delivery with gap
// detection, tick watchdog, and reconnection with exponential backoff.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod tokens;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::{ConnectionState, GatewayClient, GatewayListener, NoopListener, RequestOptions};
pub use config::ClientOptions;
pub use error::{ClientError, IdentityError, TokenStoreError, TransportError};
pub use identity::DeviceIdentity;
pub use presence::PresenceCache;
pub use protocol::*;
pub use session::SessionSummary;
pub use tokens::{DeviceTokenEntry, DeviceTokenStore};
pub use transport::{Connector, TransportLink, TransportPeer, WebSocketConnector};
