//! Korbit Market Feed Adapters
//!
//! Implements the two upstream channels of the ticker table:
//!
//! - **REST**: ticker and currency snapshots (JSON envelopes)
//! - **WebSocket**: push ticker updates over a self-healing connection

pub mod codec;
pub mod connection;
pub mod feed;
pub mod keepalive;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod transport;

pub use codec::{DecodeError, DecodedFrame, JsonCodec};
pub use connection::{
    ConnectError, Connection, ConnectionConfig, ConnectionState, ConnectionStatus, FrameStream,
    NotConnectedError,
};
pub use feed::{FeedClient, FeedConfig, SnapshotPayload};
pub use keepalive::{KeepAliveConfig, KeepAliveEvent, Liveness, TimerCounters};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{KorbitRestClient, RestError, SnapshotSource};
pub use transport::{
    FrameSink, FrameSource, Inbound, SessionHalves, Transport, TransportError, WsTransport,
};
