// Gateway Transport
//
// The connection driver never touches a socket directly. A `Connector` opens a
// `TransportLink`: a pair of channels carrying outbound text/close commands and
// inbound message/close/error notifications. `WebSocketConnector` backs the
// link with a tokio-tungstenite stream; tests back it with `TransportLink::pair`.

use crate::error::TransportError;
use crate::protocol::close_codes;
use async_trait::async_trait;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Notification from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// Command to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Client end of an open transport
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Far end of a link: what a socket pump or a test gateway holds
#[derive(Debug)]
pub struct TransportPeer {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportLink {
    pub fn pair() -> (TransportLink, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Send("transport closed".to_string()))
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

impl TransportPeer {
    /// Next command from the client, `None` once the client dropped the link.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next outbound text frame parsed as JSON, skipping close commands.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        while let Some(out) = self.outbound.recv().await {
            if let Outbound::Text(text) = out {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound
            .send(TransportEvent::Message(text.into()))
            .is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.inbound
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    pub fn error(&self, message: &str) -> bool {
        self.inbound
            .send(TransportEvent::Error(message.to_string()))
            .is_ok()
    }
}

/// Opens transports to the gateway
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!("WebSocket connection established to {}", url);

        let (link, peer) = TransportLink::pair();
        tokio::spawn(pump(ws_stream, peer));
        Ok(link)
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn pump(ws_stream: WsStream, peer: TransportPeer) {
    let TransportPeer {
        outbound: mut outbound_rx,
        inbound: inbound_tx,
    } = peer;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split::<Message>();

    loop {
        tokio::select! {
            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                            tracing::warn!("WebSocket send failed: {}", e);
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            let _ = inbound_tx.send(TransportEvent::Closed {
                                code: close_codes::ABNORMAL,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_sender.send(Message::Close(Some(frame))).await;
                        let _ = ws_sender.close().await;
                        break;
                    }
                    None => {
                        let _ = ws_sender.close().await;
                        break;
                    }
                }
            }

            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = inbound_tx.send(TransportEvent::Message(text.as_str().to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = inbound_tx.send(TransportEvent::Message(text));
                        }
                        Err(_) => tracing::debug!("dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((close_codes::NO_STATUS, String::new()));
                        let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                        let _ = inbound_tx.send(TransportEvent::Closed {
                            code: close_codes::ABNORMAL,
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(TransportEvent::Closed {
                            code: close_codes::ABNORMAL,
                            reason: "connection reset".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
}
