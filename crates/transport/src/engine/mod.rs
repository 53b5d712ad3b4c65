//! The seam between the transport and the network I/O engine underneath it.
//!
//! Engines never call back on their own: every event is surfaced from `poll`,
//! which the owning session invokes once per host tick. This keeps all
//! host-visible state on the tick thread.

pub mod loopback;
pub mod udp;

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::channel::DeliveryMode;
use crate::config::TransportConfig;

/// Smallest MTU every IPv4 host must accept.
pub const MIN_MTU: usize = 576;
/// IP + UDP headers plus the engine's own framing.
pub const MTU_OVERHEAD: usize = 68;
/// Largest payload a single message may carry on any channel.
pub const MAX_PACKET_SIZE: usize = MIN_MTU - MTU_OVERHEAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side asked to disconnect.
    Local,
    /// The remote side said goodbye.
    Remote,
    Timeout,
    /// Handshake never completed within the allowed attempts.
    ConnectionFailed,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Local => "disconnected locally",
            DisconnectReason::Remote => "disconnected by peer",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ConnectionFailed => "connection failed",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("not connected")]
    NotConnected,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("server already running")]
    AlreadyRunning,
}

pub use udp::PacketError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub address: String,
    pub max_attempts: u32,
    pub use_ipv6: bool,
    pub connect_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEngineEvent {
    Connected,
    Data {
        payload: Vec<u8>,
        mode: DeliveryMode,
    },
    Disconnected(DisconnectReason),
    /// Non-fatal I/O problem observed while polling.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEngineEvent {
    Connected(ConnectionId),
    Data {
        connection: ConnectionId,
        payload: Vec<u8>,
        mode: DeliveryMode,
    },
    Disconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    Error {
        connection: Option<ConnectionId>,
        message: String,
    },
}

pub trait ClientEngine {
    /// Starts a connection attempt. The outcome arrives later through `poll`.
    fn connect(&mut self, request: ConnectRequest);

    fn send(&mut self, mode: DeliveryMode, payload: &[u8]) -> Result<(), EngineError>;

    fn disconnect(&mut self);

    /// Advances the engine and reports everything that happened since the
    /// previous call.
    fn poll(&mut self, events: &mut dyn FnMut(ClientEngineEvent));

    fn remote_addr(&self) -> Option<SocketAddr>;
}

pub trait ServerEngine {
    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self);

    fn send_to(
        &mut self,
        connection: ConnectionId,
        mode: DeliveryMode,
        payload: &[u8],
    ) -> Result<(), EngineError>;

    /// Returns false when the connection is unknown.
    fn disconnect(&mut self, connection: ConnectionId) -> bool;

    fn poll(&mut self, events: &mut dyn FnMut(ServerEngineEvent));

    fn client_addr(&self, connection: ConnectionId) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Creates engine instances for the sessions the facade opens.
pub trait Engines {
    type Client: ClientEngine;
    type Server: ServerEngine;

    fn client(&mut self, config: &TransportConfig) -> Self::Client;

    fn server(&mut self, config: &TransportConfig) -> Self::Server;
}

pub(crate) fn check_payload_len(payload: &[u8]) -> Result<(), EngineError> {
    if payload.len() > MAX_PACKET_SIZE {
        return Err(EngineError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PACKET_SIZE,
        });
    }
    Ok(())
}
