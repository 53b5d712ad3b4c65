use std::time::Duration;

use crate::channel::{ChannelError, ChannelTable, DeliveryMode};

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_CONNECT_KEY: &str = "TICKLINE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid channel table: {0}")]
    Channels(#[from] ChannelError),
    #[error("{role} message cap must be at least 1")]
    ZeroMessageCap { role: &'static str },
    #[error("max connect attempts must be at least 1")]
    ZeroConnectAttempts,
    #[error("max connections must be at least 1")]
    ZeroConnections,
    #[error("connect key must not be empty")]
    EmptyConnectKey,
}

/// Settings shared by the facade and the engines it creates.
///
/// Set before the first connection and never changed afterwards.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    /// Minimum spacing between engine maintenance passes (resends, keepalive).
    pub update_interval: Duration,
    pub disconnect_timeout: Duration,
    pub ipv6_enabled: bool,
    /// Connect attempts before the client gives up and reports a disconnect.
    pub max_connect_attempts: u32,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    /// Simultaneous clients a server accepts.
    pub max_connections: usize,
    /// Queued server messages delivered per tick after re-enabling.
    pub server_max_messages_per_tick: usize,
    /// Queued client messages delivered per tick after re-enabling.
    pub client_max_messages_per_tick: usize,
    /// Index is the channel id.
    pub channels: Vec<DeliveryMode>,
    /// Pre-shared key a client presents during the handshake. Not a secret.
    pub connect_key: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            update_interval: Duration::from_millis(15),
            disconnect_timeout: Duration::from_millis(5000),
            ipv6_enabled: false,
            max_connect_attempts: 10,
            reconnect_delay: Duration::from_millis(500),
            ping_interval: Duration::from_millis(1000),
            max_connections: 64,
            server_max_messages_per_tick: 10_000,
            client_max_messages_per_tick: 1000,
            channels: vec![DeliveryMode::ReliableOrdered, DeliveryMode::Unreliable],
            connect_key: DEFAULT_CONNECT_KEY.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<ChannelTable, ConfigError> {
        if self.server_max_messages_per_tick == 0 {
            return Err(ConfigError::ZeroMessageCap { role: "server" });
        }
        if self.client_max_messages_per_tick == 0 {
            return Err(ConfigError::ZeroMessageCap { role: "client" });
        }
        if self.max_connect_attempts == 0 {
            return Err(ConfigError::ZeroConnectAttempts);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if self.connect_key.is_empty() {
            return Err(ConfigError::EmptyConnectKey);
        }

        Ok(ChannelTable::new(self.channels.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let table = TransportConfig::default().validate().unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_channel_errors_surface() {
        let config = TransportConfig {
            channels: vec![DeliveryMode::Unreliable, DeliveryMode::Unreliable],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Channels(ChannelError::DuplicateMode(
                DeliveryMode::Unreliable
            )))
        );

        let config = TransportConfig {
            channels: Vec::new(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Channels(ChannelError::Empty))
        );
    }

    #[test]
    fn test_zero_caps_rejected() {
        let config = TransportConfig {
            client_max_messages_per_tick: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroMessageCap { role: "client" })
        );
    }
}
