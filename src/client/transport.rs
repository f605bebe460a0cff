//! Transport abstraction for the gateway client.
//!
//! The controller only sees decoded frames and close notifications, so tests
//! can drive it over in-memory channels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::ClientError;
use crate::presentation::websocket::messages::GatewayFrame;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(GatewayFrame),
    /// The connection ended. `code` is set when the peer sent a close frame.
    Closed { code: Option<u16> },
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: &GatewayFrame) -> Result<(), ClientError>;

    /// Next frame or close. Must be cancel-safe.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError>;
}

/// Connects with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &GatewayFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame)?;
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(frame) => return TransportEvent::Frame(frame),
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable gateway frame"),
                },
                Ok(Message::Close(frame)) => {
                    return TransportEvent::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Gateway connection error");
                    return TransportEvent::Closed { code: None };
                }
            }
        }
        TransportEvent::Closed { code: None }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
