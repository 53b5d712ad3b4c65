use std::collections::VecDeque;

use crate::channel::DeliveryMode;
use crate::engine::{ConnectionId, DisconnectReason};

/// Problems reported to the host that are not disconnects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Data arrived on a delivery mode that has no channel in the table.
    #[error("received data on unmapped delivery mode {0}")]
    UnmappedMode(DeliveryMode),
    #[error("engine error: {0}")]
    Engine(String),
}

/// Host callbacks. Every method runs on the thread that calls
/// [`Transport::tick`](crate::Transport::tick), either while queued data is
/// flushed or while an engine is advanced.
#[allow(unused_variables)]
pub trait TransportHandler {
    fn on_client_connected(&mut self) {}

    fn on_client_disconnected(&mut self, reason: DisconnectReason) {}

    fn on_client_data(&mut self, payload: &[u8], channel: usize) {}

    fn on_client_error(&mut self, error: &TransportError) {}

    fn on_server_connected(&mut self, connection: ConnectionId) {}

    fn on_server_disconnected(&mut self, connection: ConnectionId, reason: DisconnectReason) {}

    fn on_server_data(&mut self, connection: ConnectionId, payload: &[u8], channel: usize) {}

    fn on_server_error(&mut self, connection: Option<ConnectionId>, error: &TransportError) {}
}

/// Handler that ignores everything.
impl TransportHandler for () {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ClientConnected,
    ClientDisconnected(DisconnectReason),
    ClientData {
        payload: Vec<u8>,
        channel: usize,
    },
    ClientError(TransportError),
    ServerConnected(ConnectionId),
    ServerDisconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    ServerData {
        connection: ConnectionId,
        payload: Vec<u8>,
        channel: usize,
    },
    ServerError {
        connection: Option<ConnectionId>,
        error: TransportError,
    },
}

/// Collects callbacks as [`TransportEvent`]s for hosts that prefer to drain
/// after each tick.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: VecDeque<TransportEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl TransportHandler for EventBuffer {
    fn on_client_connected(&mut self) {
        self.events.push_back(TransportEvent::ClientConnected);
    }

    fn on_client_disconnected(&mut self, reason: DisconnectReason) {
        self.events.push_back(TransportEvent::ClientDisconnected(reason));
    }

    fn on_client_data(&mut self, payload: &[u8], channel: usize) {
        self.events.push_back(TransportEvent::ClientData {
            payload: payload.to_vec(),
            channel,
        });
    }

    fn on_client_error(&mut self, error: &TransportError) {
        self.events.push_back(TransportEvent::ClientError(error.clone()));
    }

    fn on_server_connected(&mut self, connection: ConnectionId) {
        self.events.push_back(TransportEvent::ServerConnected(connection));
    }

    fn on_server_disconnected(&mut self, connection: ConnectionId, reason: DisconnectReason) {
        self.events.push_back(TransportEvent::ServerDisconnected {
            connection,
            reason,
        });
    }

    fn on_server_data(&mut self, connection: ConnectionId, payload: &[u8], channel: usize) {
        self.events.push_back(TransportEvent::ServerData {
            connection,
            payload: payload.to_vec(),
            channel,
        });
    }

    fn on_server_error(&mut self, connection: Option<ConnectionId>, error: &TransportError) {
        self.events.push_back(TransportEvent::ServerError {
            connection,
            error: error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_callback_order() {
        let mut buffer = EventBuffer::new();
        buffer.on_server_connected(ConnectionId(3));
        buffer.on_server_data(ConnectionId(3), b"hello", 1);
        buffer.on_server_error(None, &TransportError::Engine("oops".to_string()));

        assert_eq!(buffer.len(), 3);
        let events: Vec<_> = buffer.drain_events().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::ServerConnected(ConnectionId(3)),
                TransportEvent::ServerData {
                    connection: ConnectionId(3),
                    payload: b"hello".to_vec(),
                    channel: 1,
                },
                TransportEvent::ServerError {
                    connection: None,
                    error: TransportError::Engine("oops".to_string()),
                },
            ]
        );
        assert!(buffer.is_empty());
    }
}
