//! Streaming Transport
//!
//! Thin seam between the connection state machine and the socket library.
//! The production adapter wraps `tokio-tungstenite`; tests plug in a
//! scripted transport.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Inbound traffic, reduced to what the connection cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text payload.
    Text(String),
    /// Peer answered a probe.
    Pong,
    /// Peer probed us.
    Ping,
    /// Peer closed the session.
    Close,
}

/// Transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Write half of a session.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Write one liveness probe.
    async fn probe(&mut self) -> Result<(), TransportError>;

    /// Close the session. Errors are ignored.
    async fn close(&mut self);
}

/// Read half of a session.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame; `None` once the peer is gone.
    async fn next_frame(&mut self) -> Option<Result<Inbound, TransportError>>;
}

/// Both halves of an open session.
pub type SessionHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake with `endpoint`.
    async fn connect(&self, endpoint: &Url) -> Result<SessionHalves, TransportError>;
}

// =============================================================================
// tokio-tungstenite adapter
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Url) -> Result<SessionHalves, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.write
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            tracing::debug!(error = %e, "Error closing WebSocket");
        }
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Inbound, TransportError>> {
        loop {
            let inbound = match self.read.next().await? {
                Ok(Message::Text(text)) => Inbound::Text(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Inbound::Text(text),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Ping(_)) => Inbound::Ping,
                Ok(Message::Pong(_)) => Inbound::Pong,
                Ok(Message::Close(_)) => Inbound::Close,
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            return Some(Ok(inbound));
        }
    }
}
