//! Tick-driven client/server transport.
//!
//! Maps application channels onto delivery modes, keeps one client and one
//! server session, and hands inbound traffic to a [`TransportHandler`] only
//! from inside [`Transport::tick`]. Data arriving while delivery is disabled
//! is queued and drained in order under per-tick caps once re-enabled.

pub mod channel;
pub mod config;
pub mod engine;
pub mod events;
pub mod pump;
pub mod queue;
pub mod session;
pub mod transport;

pub use channel::{ChannelError, ChannelTable, DeliveryMode};
pub use config::{ConfigError, TransportConfig};
pub use engine::loopback::LoopbackNetwork;
pub use engine::udp::UdpEngines;
pub use engine::{ConnectionId, DisconnectReason, EngineError, MAX_PACKET_SIZE};
pub use events::{EventBuffer, TransportError, TransportEvent, TransportHandler};
pub use transport::Transport;

/// Transport over the bundled UDP engine.
pub type UdpTransport<H> = Transport<UdpEngines, H>;
