//! Minimal UDP engine: key-checked salted handshake, keepalive, timeout and
//! per-mode sequencing with ack-driven resends. No congestion control,
//! fragmentation or encryption.

mod client;
mod connection;
mod delivery;
mod endpoint;
mod protocol;
mod server;

use std::time::Duration;

pub use client::UdpClient;
pub use connection::ConnectionState;
pub use endpoint::NetworkStats;
pub use protocol::{DATAGRAM_BUFFER_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, PacketError};
pub use server::UdpServer;

use crate::config::TransportConfig;
use crate::engine::Engines;

#[derive(Debug, Clone)]
pub struct UdpSettings {
    pub port: u16,
    pub update_interval: Duration,
    pub disconnect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub ipv6_enabled: bool,
    pub max_connections: usize,
}

impl UdpSettings {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            port: config.port,
            update_interval: config.update_interval,
            disconnect_timeout: config.disconnect_timeout,
            reconnect_delay: config.reconnect_delay,
            ping_interval: config.ping_interval,
            ipv6_enabled: config.ipv6_enabled,
            max_connections: config.max_connections,
        }
    }

    /// Reliable messages are resent when unacknowledged for this long.
    pub fn resend_after(&self) -> Duration {
        (self.update_interval * 4).max(Duration::from_millis(50))
    }
}

/// Creates UDP engines from the transport configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpEngines;

impl Engines for UdpEngines {
    type Client = UdpClient;
    type Server = UdpServer;

    fn client(&mut self, config: &TransportConfig) -> UdpClient {
        UdpClient::new(UdpSettings::from_config(config))
    }

    fn server(&mut self, config: &TransportConfig) -> UdpServer {
        UdpServer::new(UdpSettings::from_config(config), config.connect_key.clone())
    }
}
