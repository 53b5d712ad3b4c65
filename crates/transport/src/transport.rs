use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;

use url::Url;

use crate::channel::ChannelTable;
use crate::config::{ConfigError, TransportConfig};
use crate::engine::{ConnectionId, Engines, MAX_PACKET_SIZE};
use crate::events::{TransportError, TransportHandler};
use crate::pump::Router;
use crate::session::{ClientSession, ListenerToken, ServerSession};

pub const URI_SCHEME: &str = "tickline";

struct ClientSlot<N: Engines> {
    session: ClientSession<N::Client>,
    token: ListenerToken,
}

struct ServerSlot<N: Engines> {
    session: ServerSession<N::Server>,
    token: ListenerToken,
}

/// Client and server transport driven by the host's tick.
///
/// Holds at most one client session and one server session. Nothing happens
/// between calls to [`tick`](Self::tick); every handler callback runs inside
/// it. The transport is deliberately `!Send`.
pub struct Transport<N: Engines, H: TransportHandler + 'static> {
    config: TransportConfig,
    engines: N,
    router: Rc<RefCell<Router<H>>>,
    enabled: Rc<Cell<bool>>,
    client: Option<ClientSlot<N>>,
    server: Option<ServerSlot<N>>,
}

impl<N: Engines, H: TransportHandler + 'static> Transport<N, H> {
    pub fn new(config: TransportConfig, engines: N, handler: H) -> Result<Self, ConfigError> {
        let channels = config.validate()?;
        let enabled = Rc::new(Cell::new(true));
        let router = Router::new(
            handler,
            channels,
            Rc::clone(&enabled),
            config.client_max_messages_per_tick,
            config.server_max_messages_per_tick,
        );

        Ok(Self {
            config,
            engines,
            router: Rc::new(RefCell::new(router)),
            enabled,
            client: None,
            server: None,
        })
    }

    /// Runs one frame: drains queued data within the per-role caps, then
    /// advances the client session, then the server session.
    pub fn tick(&mut self) {
        self.router.borrow_mut().flush();

        if let Some(slot) = self.client.as_mut() {
            slot.session.advance();
        }
        if let Some(slot) = self.server.as_mut() {
            slot.session.advance();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Shared handle to the enable flag. A handler holding it can pause
    /// delivery from inside a callback; the current flush stops at once.
    pub fn enabled_switch(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.enabled)
    }

    // Client

    pub fn connect_client(&mut self, address: &str) -> bool {
        if self
            .client
            .as_ref()
            .is_some_and(|slot| slot.session.state().is_active())
        {
            log::warn!("Can't start client as one was already connected");
            return false;
        }

        // A session that ended on the engine side is still held; drop it.
        self.teardown_client();

        let mut session = ClientSession::new(self.engines.client(&self.config));
        let router = Rc::clone(&self.router);
        let token = session.subscribe(move |event| router.borrow_mut().route_client(event));

        session.connect(
            address,
            self.config.max_connect_attempts,
            self.config.ipv6_enabled,
            &self.config.connect_key,
        );
        self.client = Some(ClientSlot { session, token });
        true
    }

    /// Disconnects without notifying the handler. No-op without a client.
    pub fn disconnect_client(&mut self) {
        self.teardown_client();
    }

    fn teardown_client(&mut self) {
        if let Some(mut slot) = self.client.take() {
            slot.session.unsubscribe(slot.token);
            slot.session.disconnect();
        }
    }

    pub fn is_client_connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|slot| slot.session.is_connected())
    }

    pub fn send_to_server(&mut self, channel: usize, payload: &[u8]) -> bool {
        let Some(slot) = self.client.as_mut().filter(|s| s.session.is_connected()) else {
            log::warn!("Can't send when client is not connected");
            return false;
        };

        let mode = match self.router.borrow().channels().resolve(channel) {
            Ok(mode) => mode,
            Err(e) => {
                log::error!("Can't send to server: {}", e);
                return false;
            }
        };
        slot.session.send(mode, payload)
    }

    // Server

    pub fn start_server(&mut self) -> bool {
        if self.server.is_some() {
            log::warn!("Can't start server as one was already active");
            return false;
        }

        let mut session = ServerSession::new(self.engines.server(&self.config));
        let router = Rc::clone(&self.router);
        let token = session.subscribe(move |event| router.borrow_mut().route_server(event));

        if let Err(e) = session.start() {
            log::error!("Server failed to start: {}", e);
            session.unsubscribe(token);
            self.router
                .borrow_mut()
                .handler_mut()
                .on_server_error(None, &TransportError::Engine(e.to_string()));
            return false;
        }

        log::info!("Server started on port {}", self.config.port);
        self.server = Some(ServerSlot { session, token });
        true
    }

    pub fn stop_server(&mut self) {
        match self.server.take() {
            Some(mut slot) => {
                slot.session.unsubscribe(slot.token);
                slot.session.stop();
            }
            None => log::warn!("Can't stop server as no server was active"),
        }
    }

    pub fn is_server_active(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|slot| slot.session.is_active())
    }

    pub fn send_to_client(
        &mut self,
        connection: ConnectionId,
        channel: usize,
        payload: &[u8],
    ) -> bool {
        let Some(slot) = self.server.as_mut() else {
            log::warn!("Can't send when server is not active");
            return false;
        };

        let mode = match self.router.borrow().channels().resolve(channel) {
            Ok(mode) => mode,
            Err(e) => {
                log::error!("Can't send to {}: {}", connection, e);
                return false;
            }
        };
        slot.session.send_to(connection, mode, payload)
    }

    /// Sends the same payload to every listed connection. Returns true only
    /// if every send was accepted; a failure does not stop the rest.
    pub fn send_to_clients(
        &mut self,
        connections: &[ConnectionId],
        channel: usize,
        payload: &[u8],
    ) -> bool {
        if self.server.is_none() {
            log::warn!("Can't send when server is not active");
            return false;
        }

        connections
            .iter()
            .fold(true, |all, id| self.send_to_client(*id, channel, payload) && all)
    }

    pub fn disconnect_peer(&mut self, connection: ConnectionId) -> bool {
        match self.server.as_mut() {
            Some(slot) => slot.session.disconnect(connection),
            None => {
                log::warn!("Can't disconnect when server is not active");
                false
            }
        }
    }

    pub fn connected_clients(&self) -> Vec<ConnectionId> {
        self.server
            .as_ref()
            .map(|slot| slot.session.connections().collect())
            .unwrap_or_default()
    }

    pub fn client_socket_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.server
            .as_ref()
            .and_then(|slot| slot.session.client_addr(connection))
    }

    /// IP address of a connected client, without the port.
    pub fn client_address(&self, connection: ConnectionId) -> Option<String> {
        self.client_socket_addr(connection)
            .map(|addr| addr.ip().to_string())
    }

    /// `tickline://host:port` of the running server. An unspecified bind
    /// address is reported as `localhost`.
    pub fn server_uri(&self) -> Option<Url> {
        let addr = self.server.as_ref()?.session.local_addr()?;
        let authority = if addr.ip().is_unspecified() {
            format!("localhost:{}", addr.port())
        } else {
            addr.to_string()
        };

        match Url::parse(&format!("{}://{}", URI_SCHEME, authority)) {
            Ok(url) => Some(url),
            Err(e) => {
                log::error!("Could not build server uri for {}: {}", addr, e);
                None
            }
        }
    }

    // Shared

    /// Largest payload accepted on the given channel. Fixed for all channels
    /// since the engine never negotiates a larger MTU.
    pub fn max_packet_size(&self, _channel: usize) -> usize {
        MAX_PACKET_SIZE
    }

    pub fn shutdown(&mut self) {
        self.disconnect_client();
        if self.server.is_some() {
            self.stop_server();
        }
        log::info!("Transport shut down");
    }

    /// Queued data waiting for delivery as (client, server).
    pub fn pending_messages(&self) -> (usize, usize) {
        self.router.borrow().pending()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn channels(&self) -> Ref<'_, ChannelTable> {
        Ref::map(self.router.borrow(), |router| router.channels())
    }

    /// Must not be held across [`tick`](Self::tick).
    pub fn handler(&self) -> Ref<'_, H> {
        Ref::map(self.router.borrow(), |router| router.handler())
    }

    pub fn handler_mut(&mut self) -> RefMut<'_, H> {
        RefMut::map(self.router.borrow_mut(), |router| router.handler_mut())
    }

    pub fn client_engine(&self) -> Option<&N::Client> {
        self.client.as_ref().map(|slot| slot.session.engine())
    }

    pub fn server_engine(&self) -> Option<&N::Server> {
        self.server.as_ref().map(|slot| slot.session.engine())
    }
}

impl<N: Engines, H: TransportHandler + 'static> fmt::Display for Transport<N, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server.is_some() {
            return write!(f, "Tickline server port: {}", self.config.port);
        }

        match self.client.as_ref().map(|slot| &slot.session) {
            Some(session) if session.is_connected() => match session.remote_addr() {
                Some(addr) => write!(f, "Tickline client ip: {}", addr),
                None => write!(f, "Tickline client connected"),
            },
            Some(session) if session.state().is_active() => write!(f, "Tickline connecting..."),
            _ => write!(f, "Tickline (inactive/disconnected)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loopback::LoopbackNetwork;
    use crate::events::EventBuffer;

    fn transport(net: &LoopbackNetwork) -> Transport<LoopbackNetwork, EventBuffer> {
        Transport::new(TransportConfig::default(), net.clone(), EventBuffer::new()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = TransportConfig {
            channels: Vec::new(),
            ..Default::default()
        };
        assert!(Transport::new(config, LoopbackNetwork::new(), ()).is_err());
    }

    #[test]
    fn test_display_follows_state() {
        let net = LoopbackNetwork::new();
        let mut server = transport(&net);
        let mut client = transport(&net);

        assert_eq!(client.to_string(), "Tickline (inactive/disconnected)");

        assert!(server.start_server());
        assert_eq!(server.to_string(), "Tickline server port: 8888");

        assert!(client.connect_client("localhost"));
        assert_eq!(client.to_string(), "Tickline connecting...");

        server.tick();
        client.tick();
        assert!(client.is_client_connected());
        assert!(client.to_string().starts_with("Tickline client ip: 127.0.0.1"));
    }

    #[test]
    fn test_second_start_and_connect_rejected() {
        let net = LoopbackNetwork::new();
        let mut t = transport(&net);

        assert!(t.start_server());
        assert!(!t.start_server());
        assert!(t.is_server_active());

        assert!(t.connect_client("localhost"));
        assert!(!t.connect_client("localhost"));
    }

    #[test]
    fn test_server_uri_and_packet_size() {
        let net = LoopbackNetwork::new();
        let mut t = transport(&net);
        assert_eq!(t.server_uri(), None);

        t.start_server();
        let uri = t.server_uri().unwrap();
        assert_eq!(uri.scheme(), "tickline");
        assert_eq!(uri.port(), Some(7777));
        assert_eq!(t.max_packet_size(0), 508);
        assert_eq!(t.max_packet_size(1), 508);
    }

    #[test]
    fn test_send_to_server_rejects_bad_channel() {
        let net = LoopbackNetwork::new();
        let mut server = transport(&net);
        let mut client = transport(&net);
        server.start_server();
        client.connect_client("localhost");
        server.tick();
        client.tick();

        assert!(!client.send_to_server(5, b"x"));
        assert_eq!(net.data_sent(), 0);
        assert!(client.send_to_server(1, b"x"));
        assert_eq!(net.data_sent(), 1);
    }

    #[test]
    fn test_shutdown_clears_both_roles() {
        let net = LoopbackNetwork::new();
        let mut t = transport(&net);
        t.start_server();
        t.connect_client("localhost");

        t.shutdown();
        assert!(!t.is_server_active());
        assert!(!t.is_client_connected());
        assert!(!net.server_running());
        assert!(t.handler().is_empty());
    }
}
