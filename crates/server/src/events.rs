use std::net::SocketAddr;

use tickline::{ConnectionId, DisconnectReason};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        connection: ConnectionId,
        addr: Option<SocketAddr>,
    },
    ClientDisconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    Echoed {
        connection: ConnectionId,
        channel: usize,
        len: usize,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn describe(&self) -> String {
        match self {
            ServerEvent::ClientConnected { connection, addr } => match addr {
                Some(addr) => format!("Client {} connected from {}", connection, addr),
                None => format!("Client {} connected", connection),
            },
            ServerEvent::ClientDisconnected { connection, reason } => {
                format!("Client {} {}", connection, reason.as_str())
            }
            ServerEvent::Echoed {
                connection,
                channel,
                len,
            } => format!("Echoed {} bytes to {} on channel {}", len, connection, channel),
            ServerEvent::Error { message } => message.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }
}
