//! In-process engine pair. Clients and the server share a hub of mailboxes;
//! nothing moves until the receiving side polls, so delivery timing matches
//! a real engine that only surfaces events from `poll`.
//!
//! There is a single server per hub, so the connect address is ignored.
//! Clients get synthetic `127.0.0.1:<slot>` addresses.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::channel::DeliveryMode;
use crate::config::TransportConfig;
use crate::engine::{
    ClientEngine, ClientEngineEvent, ConnectRequest, ConnectionId, DisconnectReason,
    EngineError, Engines, ServerEngine, ServerEngineEvent, check_payload_len,
};

/// Polls a connecting client waits for an answer before asking again.
const RETRY_POLLS: u32 = 2;
const SERVER_PORT: u16 = 7777;

#[derive(Debug, Clone)]
enum Wire {
    ConnectRequest { connect_key: String },
    Accepted,
    Data { mode: DeliveryMode, payload: Vec<u8> },
    Disconnect,
}

#[derive(Debug, Default)]
struct Hub {
    server_running: bool,
    server_inbox: VecDeque<(u16, Wire)>,
    client_inboxes: HashMap<u16, VecDeque<Wire>>,
    next_slot: u16,
    data_sent: usize,
}

impl Hub {
    fn push_to_client(&mut self, slot: u16, wire: Wire) {
        if matches!(wire, Wire::Data { .. }) {
            self.data_sent += 1;
        }
        if let Some(inbox) = self.client_inboxes.get_mut(&slot) {
            inbox.push_back(wire);
        }
    }

    fn push_to_server(&mut self, slot: u16, wire: Wire) {
        if matches!(wire, Wire::Data { .. }) {
            self.data_sent += 1;
        }
        if self.server_running {
            self.server_inbox.push_back((slot, wire));
        }
    }
}

fn slot_addr(slot: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], slot))
}

/// Shared handle to one loopback hub; clone it to give several transports
/// access to the same network.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data messages handed to the hub by any engine so far.
    pub fn data_sent(&self) -> usize {
        self.hub.borrow().data_sent
    }

    pub fn server_running(&self) -> bool {
        self.hub.borrow().server_running
    }
}

impl Engines for LoopbackNetwork {
    type Client = LoopbackClient;
    type Server = LoopbackServer;

    fn client(&mut self, _config: &TransportConfig) -> LoopbackClient {
        let mut hub = self.hub.borrow_mut();
        hub.next_slot = hub.next_slot.wrapping_add(1).max(1);
        let slot = hub.next_slot;
        hub.client_inboxes.insert(slot, VecDeque::new());

        LoopbackClient {
            hub: Rc::clone(&self.hub),
            slot,
            state: ClientState::Idle,
            connect_key: String::new(),
            attempts: 0,
            max_attempts: 0,
            polls_waiting: 0,
        }
    }

    fn server(&mut self, config: &TransportConfig) -> LoopbackServer {
        LoopbackServer {
            hub: Rc::clone(&self.hub),
            connect_key: config.connect_key.clone(),
            running: false,
            connections: HashMap::new(),
            next_id: 1,
            pending_events: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Idle,
    Connecting,
    Connected,
}

pub struct LoopbackClient {
    hub: Rc<RefCell<Hub>>,
    slot: u16,
    state: ClientState,
    connect_key: String,
    attempts: u32,
    max_attempts: u32,
    polls_waiting: u32,
}

impl LoopbackClient {
    fn request(&mut self) {
        self.attempts += 1;
        self.polls_waiting = 0;
        let wire = Wire::ConnectRequest {
            connect_key: self.connect_key.clone(),
        };
        self.hub.borrow_mut().push_to_server(self.slot, wire);
    }
}

impl ClientEngine for LoopbackClient {
    fn connect(&mut self, request: ConnectRequest) {
        if self.state != ClientState::Idle {
            log::warn!("Loopback client already connecting or connected");
            return;
        }
        self.state = ClientState::Connecting;
        self.connect_key = request.connect_key;
        self.max_attempts = request.max_attempts.max(1);
        self.attempts = 0;
        self.request();
    }

    fn send(&mut self, mode: DeliveryMode, payload: &[u8]) -> Result<(), EngineError> {
        if self.state != ClientState::Connected {
            return Err(EngineError::NotConnected);
        }
        check_payload_len(payload)?;

        let wire = Wire::Data {
            mode,
            payload: payload.to_vec(),
        };
        self.hub.borrow_mut().push_to_server(self.slot, wire);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.state == ClientState::Idle {
            return;
        }
        let mut hub = self.hub.borrow_mut();
        hub.push_to_server(self.slot, Wire::Disconnect);
        if let Some(inbox) = hub.client_inboxes.get_mut(&self.slot) {
            inbox.clear();
        }
        self.state = ClientState::Idle;
    }

    fn poll(&mut self, events: &mut dyn FnMut(ClientEngineEvent)) {
        let inbox: Vec<Wire> = self
            .hub
            .borrow_mut()
            .client_inboxes
            .get_mut(&self.slot)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default();

        let mut ready = Vec::new();
        for wire in inbox {
            match (wire, self.state) {
                (Wire::Accepted, ClientState::Connecting) => {
                    self.state = ClientState::Connected;
                    ready.push(ClientEngineEvent::Connected);
                }
                (Wire::Data { mode, payload }, ClientState::Connected) => {
                    ready.push(ClientEngineEvent::Data { payload, mode });
                }
                (Wire::Disconnect, ClientState::Connected | ClientState::Connecting) => {
                    self.state = ClientState::Idle;
                    ready.push(ClientEngineEvent::Disconnected(DisconnectReason::Remote));
                }
                _ => {}
            }
        }

        if self.state == ClientState::Connecting {
            self.polls_waiting += 1;
            if self.polls_waiting >= RETRY_POLLS {
                if self.attempts >= self.max_attempts {
                    self.state = ClientState::Idle;
                    ready.push(ClientEngineEvent::Disconnected(
                        DisconnectReason::ConnectionFailed,
                    ));
                } else {
                    self.request();
                }
            }
        }

        for event in ready {
            events(event);
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (self.state != ClientState::Idle).then(|| SocketAddr::from(([127, 0, 0, 1], SERVER_PORT)))
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        if let Ok(mut hub) = self.hub.try_borrow_mut() {
            hub.client_inboxes.remove(&self.slot);
        }
    }
}

pub struct LoopbackServer {
    hub: Rc<RefCell<Hub>>,
    connect_key: String,
    running: bool,
    connections: HashMap<ConnectionId, u16>,
    next_id: u32,
    pending_events: VecDeque<ServerEngineEvent>,
}

impl LoopbackServer {
    fn connection_for(&self, slot: u16) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(id, _)| *id)
    }
}

impl ServerEngine for LoopbackServer {
    fn start(&mut self) -> Result<(), EngineError> {
        let mut hub = self.hub.borrow_mut();
        if self.running || hub.server_running {
            return Err(EngineError::AlreadyRunning);
        }
        hub.server_running = true;
        hub.server_inbox.clear();
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        let mut hub = self.hub.borrow_mut();
        for slot in self.connections.values() {
            hub.push_to_client(*slot, Wire::Disconnect);
        }
        hub.server_running = false;
        hub.server_inbox.clear();
        self.connections.clear();
        self.pending_events.clear();
        self.running = false;
    }

    fn send_to(
        &mut self,
        connection: ConnectionId,
        mode: DeliveryMode,
        payload: &[u8],
    ) -> Result<(), EngineError> {
        check_payload_len(payload)?;
        let slot = *self
            .connections
            .get(&connection)
            .ok_or(EngineError::UnknownConnection(connection))?;

        let wire = Wire::Data {
            mode,
            payload: payload.to_vec(),
        };
        self.hub.borrow_mut().push_to_client(slot, wire);
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let Some(slot) = self.connections.remove(&connection) else {
            return false;
        };
        self.hub.borrow_mut().push_to_client(slot, Wire::Disconnect);
        self.pending_events.push_back(ServerEngineEvent::Disconnected {
            connection,
            reason: DisconnectReason::Kicked,
        });
        true
    }

    fn poll(&mut self, events: &mut dyn FnMut(ServerEngineEvent)) {
        if !self.running {
            return;
        }

        let inbox: Vec<(u16, Wire)> = self.hub.borrow_mut().server_inbox.drain(..).collect();

        for (slot, wire) in inbox {
            match wire {
                Wire::ConnectRequest { connect_key } => {
                    if connect_key != self.connect_key {
                        log::debug!("Ignoring loopback connect from slot {} with wrong key", slot);
                        continue;
                    }
                    if self.connection_for(slot).is_none() {
                        let connection = ConnectionId(self.next_id);
                        self.next_id += 1;
                        self.connections.insert(connection, slot);
                        self.pending_events
                            .push_back(ServerEngineEvent::Connected(connection));
                        self.hub.borrow_mut().push_to_client(slot, Wire::Accepted);
                    }
                }
                Wire::Data { mode, payload } => {
                    if let Some(connection) = self.connection_for(slot) {
                        self.pending_events.push_back(ServerEngineEvent::Data {
                            connection,
                            payload,
                            mode,
                        });
                    }
                }
                Wire::Disconnect => {
                    if let Some(connection) = self.connection_for(slot) {
                        self.connections.remove(&connection);
                        self.pending_events.push_back(ServerEngineEvent::Disconnected {
                            connection,
                            reason: DisconnectReason::Remote,
                        });
                    }
                }
                Wire::Accepted => {}
            }
        }

        while let Some(event) = self.pending_events.pop_front() {
            events(event);
        }
    }

    fn client_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(|slot| slot_addr(*slot))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .then(|| SocketAddr::from(([127, 0, 0, 1], SERVER_PORT)))
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if self.running {
            if let Ok(mut hub) = self.hub.try_borrow_mut() {
                hub.server_running = false;
            }
        }
    }
}
