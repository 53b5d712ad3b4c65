use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use super::UdpSettings;
use super::connection::{ConnectionState, Peer, PeerManager};
use super::endpoint::{NetworkStats, UdpEndpoint};
use super::protocol::{Packet, PacketBody, now_ms};
use crate::channel::DeliveryMode;
use crate::engine::{
    ConnectionId, DisconnectReason, EngineError, ServerEngine, ServerEngineEvent,
    check_payload_len,
};

pub struct UdpServer {
    settings: UdpSettings,
    connect_key: String,
    endpoint: Option<UdpEndpoint>,
    peers: PeerManager,
    last_maintenance: Instant,
    last_ping_time: Instant,
    pending_events: VecDeque<ServerEngineEvent>,
}

impl UdpServer {
    pub fn new(settings: UdpSettings, connect_key: String) -> Self {
        let now = Instant::now();
        Self {
            peers: PeerManager::new(
                settings.max_connections,
                settings.disconnect_timeout,
                settings.resend_after(),
            ),
            settings,
            connect_key,
            endpoint: None,
            last_maintenance: now,
            last_ping_time: now,
            pending_events: VecDeque::new(),
        }
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        self.endpoint.as_ref().map(|e| e.stats())
    }

    fn send_raw(&mut self, body: PacketBody, addr: SocketAddr) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };
        if let Err(e) = endpoint.send_to(&Packet::new(body), addr) {
            self.pending_events.push_back(ServerEngineEvent::Error {
                connection: None,
                message: format!("send to {} failed: {}", addr, e),
            });
        }
    }

    fn drop_peer(&mut self, peer: Peer, reason: DisconnectReason) {
        // Peers that never finished the handshake were never announced.
        if peer.state == ConnectionState::Connected {
            log::info!("Connection {} ({}) {}", peer.id, peer.addr, reason.as_str());
            self.pending_events.push_back(ServerEngineEvent::Disconnected {
                connection: peer.id,
                reason,
            });
        }
    }

    fn handle_packet(&mut self, body: PacketBody, addr: SocketAddr) {
        match body {
            PacketBody::ConnectRequest {
                connect_key,
                client_salt,
            } => self.handle_connect_request(addr, &connect_key, client_salt),
            PacketBody::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt)
            }
            PacketBody::Data {
                mode,
                sequence,
                payload,
            } => {
                let Some(peer) = self.peers.get_by_addr_mut(&addr) else {
                    return;
                };
                if !peer.is_connected() {
                    return;
                }
                let connection = peer.id;
                let inbound = peer.delivery.on_data(mode, sequence, payload);
                if let Some(ack) = inbound.ack {
                    self.send_raw(ack, addr);
                }
                for payload in inbound.deliver {
                    self.pending_events.push_back(ServerEngineEvent::Data {
                        connection,
                        payload,
                        mode,
                    });
                }
            }
            PacketBody::Ack { mode, sequence } => {
                if let Some(peer) = self.peers.get_by_addr_mut(&addr) {
                    peer.delivery.on_ack(mode, sequence);
                }
            }
            PacketBody::Ping { timestamp_ms } => {
                if self.peers.get_by_addr_mut(&addr).is_some() {
                    self.send_raw(PacketBody::Pong { timestamp_ms }, addr);
                }
            }
            PacketBody::Disconnect => {
                if let Some(peer) = self.peers.remove_by_addr(&addr) {
                    self.drop_peer(peer, DisconnectReason::Remote);
                }
            }
            PacketBody::Pong { .. }
            | PacketBody::Challenge { .. }
            | PacketBody::Accepted { .. }
            | PacketBody::Denied { .. } => {}
        }
    }

    fn handle_connect_request(&mut self, addr: SocketAddr, connect_key: &str, client_salt: u64) {
        if connect_key != self.connect_key {
            log::debug!("Ignoring connect request from {} with wrong key", addr);
            return;
        }

        // A connected peer asking again with a new salt has restarted.
        let restarted = self
            .peers
            .get_by_addr_mut(&addr)
            .is_some_and(|p| p.is_connected() && p.client_salt != client_salt);
        if restarted {
            if let Some(peer) = self.peers.remove_by_addr(&addr) {
                self.drop_peer(peer, DisconnectReason::Remote);
            }
        }

        let body = match self.peers.get_or_create_pending(addr, client_salt) {
            Ok(peer) => PacketBody::Challenge {
                server_salt: peer.server_salt,
                challenge: peer.combined_salt(),
            },
            Err(reason) => {
                log::warn!("Denied connection from {}: {}", addr, reason);
                PacketBody::Denied {
                    reason: reason.to_string(),
                }
            }
        };
        self.send_raw(body, addr);
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) {
        let Some(peer) = self.peers.get_by_addr_mut(&addr) else {
            return;
        };

        if combined_salt != peer.combined_salt() {
            log::warn!("Invalid challenge response from {}", addr);
            return;
        }

        let connection = peer.id;
        if !peer.is_connected() {
            peer.state = ConnectionState::Connected;
            log::info!("Connection {} accepted from {}", connection, addr);
            self.pending_events
                .push_back(ServerEngineEvent::Connected(connection));
        }

        // Repeated for every response in case an earlier Accepted was lost.
        self.send_raw(
            PacketBody::Accepted {
                connection_id: connection.0,
            },
            addr,
        );
    }

    fn maintain(&mut self) {
        for peer in self.peers.cleanup_timed_out() {
            self.drop_peer(peer, DisconnectReason::Timeout);
        }

        let now = Instant::now();
        if now.duration_since(self.last_maintenance) < self.settings.update_interval {
            return;
        }
        self.last_maintenance = now;

        let ping_due = now.duration_since(self.last_ping_time) >= self.settings.ping_interval;
        if ping_due {
            self.last_ping_time = now;
        }

        let mut outgoing = Vec::new();
        for peer in self.peers.iter_mut().filter(|p| p.is_connected()) {
            if ping_due {
                outgoing.push((
                    PacketBody::Ping {
                        timestamp_ms: now_ms(),
                    },
                    peer.addr,
                ));
            }
            for body in peer.delivery.due_resends(now) {
                outgoing.push((body, peer.addr));
            }
        }

        for (body, addr) in outgoing {
            self.send_raw(body, addr);
        }
    }
}

impl ServerEngine for UdpServer {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.endpoint.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let endpoint = if self.settings.ipv6_enabled {
            UdpEndpoint::bind(("::", self.settings.port))?
        } else {
            UdpEndpoint::bind(("0.0.0.0", self.settings.port))?
        };

        log::info!("Server listening on {}", endpoint.local_addr());
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn stop(&mut self) {
        for peer in self.peers.clear() {
            if peer.is_connected() {
                self.send_raw(PacketBody::Disconnect, peer.addr);
            }
        }
        self.endpoint = None;
        self.pending_events.clear();
    }

    fn send_to(
        &mut self,
        connection: ConnectionId,
        mode: DeliveryMode,
        payload: &[u8],
    ) -> Result<(), EngineError> {
        check_payload_len(payload)?;

        let peer = self
            .peers
            .get_mut(connection)
            .filter(|p| p.is_connected())
            .ok_or(EngineError::UnknownConnection(connection))?;
        let addr = peer.addr;
        let body = peer.delivery.prepare(mode, payload);

        let endpoint = self.endpoint.as_mut().ok_or(EngineError::NotConnected)?;
        endpoint.send_to(&Packet::new(body), addr)?;
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) -> bool {
        let Some(peer) = self.peers.remove(connection) else {
            return false;
        };
        self.send_raw(PacketBody::Disconnect, peer.addr);
        self.drop_peer(peer, DisconnectReason::Kicked);
        true
    }

    fn poll(&mut self, events: &mut dyn FnMut(ServerEngineEvent)) {
        let received = match self.endpoint.as_mut() {
            Some(endpoint) => endpoint.receive(),
            None => Ok(Vec::new()),
        };

        match received {
            Ok(packets) => {
                for (packet, addr) in packets {
                    if let Some(peer) = self.peers.get_by_addr_mut(&addr) {
                        peer.touch();
                    }
                    self.handle_packet(packet.body, addr);
                }
            }
            Err(e) => self.pending_events.push_back(ServerEngineEvent::Error {
                connection: None,
                message: format!("receive failed: {}", e),
            }),
        }

        if self.endpoint.is_some() {
            self.maintain();
        }

        while let Some(event) = self.pending_events.pop_front() {
            events(event);
        }
    }

    fn client_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.peers.get(connection).map(|p| p.addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().map(|e| e.local_addr())
    }
}
