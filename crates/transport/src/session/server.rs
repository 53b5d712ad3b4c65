use std::collections::BTreeSet;
use std::net::SocketAddr;

use super::listeners::{ListenerToken, Listeners};
use crate::channel::DeliveryMode;
use crate::engine::{ConnectionId, EngineError, ServerEngine, ServerEngineEvent};

/// The local endpoint acting as a server for many remote clients.
pub struct ServerSession<E: ServerEngine> {
    engine: E,
    active: bool,
    connections: BTreeSet<ConnectionId>,
    listeners: Listeners<ServerEngineEvent>,
}

impl<E: ServerEngine> ServerSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            active: false,
            connections: BTreeSet::new(),
            listeners: Listeners::default(),
        }
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&ServerEngineEvent) + 'static,
    ) -> ListenerToken {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.active {
            log::warn!("Can't start server as one is already active");
            return Err(EngineError::AlreadyRunning);
        }

        self.engine.start()?;
        self.active = true;
        Ok(())
    }

    /// Stops listening and forgets every connection. Listeners are dropped
    /// before the engine stops.
    pub fn stop(&mut self) {
        if self.listeners.len() > 0 {
            log::debug!("Dropping {} server listeners", self.listeners.len());
        }
        self.listeners.clear();
        if !self.active {
            log::warn!("Can't stop server as no server was active");
            return;
        }

        self.engine.stop();
        self.connections.clear();
        self.active = false;
        log::info!("Server stopped");
    }

    pub fn send_to(
        &mut self,
        connection: ConnectionId,
        mode: DeliveryMode,
        payload: &[u8],
    ) -> bool {
        if !self.active {
            log::warn!("Can't send when server is not active");
            return false;
        }
        if !self.connections.contains(&connection) {
            log::warn!("Can't send to unknown connection {}", connection);
            return false;
        }

        match self.engine.send_to(connection, mode, payload) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Send to {} on {} failed: {}", connection, mode, e);
                false
            }
        }
    }

    /// Kicks one client. The matching disconnect event arrives on a later
    /// `advance`.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        if !self.active {
            log::warn!("Can't disconnect when server is not active");
            return false;
        }
        if !self.engine.disconnect(connection) {
            log::warn!("Can't disconnect unknown connection {}", connection);
            return false;
        }
        true
    }

    pub fn advance(&mut self) {
        if !self.active {
            return;
        }

        let Self {
            engine,
            connections,
            listeners,
            ..
        } = self;

        engine.poll(&mut |event| {
            match &event {
                ServerEngineEvent::Connected(id) => {
                    connections.insert(*id);
                }
                ServerEngineEvent::Disconnected { connection, .. } => {
                    connections.remove(connection);
                }
                ServerEngineEvent::Data { .. } | ServerEngineEvent::Error { .. } => {}
            }
            listeners.emit(&event);
        });
    }

    pub fn client_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.engine.client_addr(connection)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.local_addr()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E: ServerEngine> Drop for ServerSession<E> {
    fn drop(&mut self) {
        if self.active {
            self.stop();
        }
    }
}
