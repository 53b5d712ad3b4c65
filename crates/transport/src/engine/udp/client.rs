use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use super::UdpSettings;
use super::connection::ConnectionState;
use super::delivery::DeliveryState;
use super::endpoint::{NetworkStats, UdpEndpoint};
use super::protocol::{Packet, PacketBody, now_ms, random_salt};
use crate::channel::DeliveryMode;
use crate::engine::{
    ClientEngine, ClientEngineEvent, ConnectRequest, DisconnectReason, EngineError,
    check_payload_len,
};

pub struct UdpClient {
    settings: UdpSettings,
    endpoint: Option<UdpEndpoint>,
    remote_addr: Option<SocketAddr>,
    state: ConnectionState,
    connect_key: String,
    max_attempts: u32,
    attempts: u32,
    client_salt: u64,
    server_salt: Option<u64>,
    last_attempt: Instant,
    last_receive_time: Instant,
    last_ping_time: Instant,
    last_maintenance: Instant,
    delivery: DeliveryState,
    pending_events: VecDeque<ClientEngineEvent>,
    rtt_ms: Option<u64>,
}

impl UdpClient {
    pub fn new(settings: UdpSettings) -> Self {
        let now = Instant::now();
        Self {
            delivery: DeliveryState::new(settings.resend_after()),
            settings,
            endpoint: None,
            remote_addr: None,
            state: ConnectionState::Disconnected,
            connect_key: String::new(),
            max_attempts: 0,
            attempts: 0,
            client_salt: 0,
            server_salt: None,
            last_attempt: now,
            last_receive_time: now,
            last_ping_time: now,
            last_maintenance: now,
            pending_events: VecDeque::new(),
            rtt_ms: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn rtt_ms(&self) -> Option<u64> {
        self.rtt_ms
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        self.endpoint.as_ref().map(|e| e.stats())
    }

    fn resolve(&self, address: &str, use_ipv6: bool) -> io::Result<SocketAddr> {
        let candidates: Vec<SocketAddr> = match address.parse::<SocketAddr>() {
            Ok(addr) => vec![addr],
            Err(_) => (address, self.settings.port).to_socket_addrs()?.collect(),
        };

        candidates
            .iter()
            .find(|a| a.is_ipv6() == use_ipv6)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", address),
                )
            })
    }

    fn open(&mut self, request: &ConnectRequest) -> io::Result<()> {
        let remote = self.resolve(&request.address, request.use_ipv6)?;
        let endpoint = if remote.is_ipv6() {
            UdpEndpoint::bind("[::]:0")?
        } else {
            UdpEndpoint::bind("0.0.0.0:0")?
        };

        log::debug!("Client bound {} for {}", endpoint.local_addr(), remote);
        self.endpoint = Some(endpoint);
        self.remote_addr = Some(remote);
        Ok(())
    }

    fn send_body(&mut self, body: PacketBody) -> Result<(), EngineError> {
        let (Some(endpoint), Some(remote)) = (self.endpoint.as_mut(), self.remote_addr) else {
            return Err(EngineError::NotConnected);
        };
        endpoint.send_to(&Packet::new(body), remote)?;
        Ok(())
    }

    fn send_handshake(&mut self) {
        self.attempts += 1;
        self.last_attempt = Instant::now();

        let body = match self.state {
            ConnectionState::ChallengeResponse => PacketBody::ChallengeResponse {
                combined_salt: self.client_salt ^ self.server_salt_or_zero(),
            },
            _ => PacketBody::ConnectRequest {
                connect_key: self.connect_key.clone(),
                client_salt: self.client_salt,
            },
        };

        log::debug!(
            "Connect attempt {}/{} to {:?}",
            self.attempts,
            self.max_attempts,
            self.remote_addr
        );
        if let Err(e) = self.send_body(body) {
            self.pending_events
                .push_back(ClientEngineEvent::Error(format!("handshake send failed: {}", e)));
        }
    }

    fn server_salt_or_zero(&self) -> u64 {
        self.server_salt.unwrap_or_default()
    }

    fn close(&mut self, reason: Option<DisconnectReason>) {
        if let Some(reason) = reason {
            log::info!("Client {}", reason.as_str());
            self.pending_events
                .push_back(ClientEngineEvent::Disconnected(reason));
        }
        self.state = ConnectionState::Disconnected;
        self.endpoint = None;
        self.remote_addr = None;
        self.server_salt = None;
        self.attempts = 0;
        self.delivery = DeliveryState::new(self.settings.resend_after());
    }

    fn handle_packet(&mut self, body: PacketBody) {
        match body {
            PacketBody::Challenge {
                server_salt,
                challenge,
            } => {
                if self.state == ConnectionState::Connected {
                    return;
                }
                if challenge != self.client_salt ^ server_salt {
                    log::warn!("Challenge mismatch from server");
                    return;
                }
                self.server_salt = Some(server_salt);
                self.state = ConnectionState::ChallengeResponse;
                let body = PacketBody::ChallengeResponse {
                    combined_salt: challenge,
                };
                if let Err(e) = self.send_body(body) {
                    self.pending_events
                        .push_back(ClientEngineEvent::Error(e.to_string()));
                }
            }
            PacketBody::Accepted { connection_id } => {
                if self.state != ConnectionState::ChallengeResponse {
                    return;
                }
                log::info!(
                    "Connected to {:?} as connection {}",
                    self.remote_addr,
                    connection_id
                );
                self.state = ConnectionState::Connected;
                self.last_ping_time = Instant::now();
                self.pending_events.push_back(ClientEngineEvent::Connected);
            }
            PacketBody::Denied { reason } => {
                log::warn!("Connection denied: {}", reason);
                self.close(Some(DisconnectReason::ConnectionFailed));
            }
            PacketBody::Data {
                mode,
                sequence,
                payload,
            } => {
                if self.state != ConnectionState::Connected {
                    return;
                }
                let inbound = self.delivery.on_data(mode, sequence, payload);
                if let Some(ack) = inbound.ack {
                    let _ = self.send_body(ack);
                }
                for payload in inbound.deliver {
                    self.pending_events
                        .push_back(ClientEngineEvent::Data { payload, mode });
                }
            }
            PacketBody::Ack { mode, sequence } => self.delivery.on_ack(mode, sequence),
            PacketBody::Ping { timestamp_ms } => {
                let _ = self.send_body(PacketBody::Pong { timestamp_ms });
            }
            PacketBody::Pong { timestamp_ms } => {
                self.rtt_ms = Some(now_ms().saturating_sub(timestamp_ms));
            }
            PacketBody::Disconnect => {
                if self.state != ConnectionState::Disconnected {
                    self.close(Some(DisconnectReason::Remote));
                }
            }
            PacketBody::ConnectRequest { .. } | PacketBody::ChallengeResponse { .. } => {}
        }
    }

    fn maintain(&mut self) {
        let now = Instant::now();
        match self.state {
            ConnectionState::Connecting | ConnectionState::ChallengeResponse => {
                if now.duration_since(self.last_attempt) < self.settings.reconnect_delay {
                    return;
                }
                if self.attempts >= self.max_attempts {
                    log::warn!("Gave up after {} connect attempts", self.attempts);
                    self.close(Some(DisconnectReason::ConnectionFailed));
                } else {
                    self.send_handshake();
                }
            }
            ConnectionState::Connected => {
                if self.last_receive_time.elapsed() > self.settings.disconnect_timeout {
                    self.close(Some(DisconnectReason::Timeout));
                    return;
                }

                if now.duration_since(self.last_maintenance) < self.settings.update_interval {
                    return;
                }
                self.last_maintenance = now;

                if now.duration_since(self.last_ping_time) >= self.settings.ping_interval {
                    self.last_ping_time = now;
                    let _ = self.send_body(PacketBody::Ping {
                        timestamp_ms: now_ms(),
                    });
                }

                for body in self.delivery.due_resends(now) {
                    let _ = self.send_body(body);
                }
            }
            ConnectionState::Disconnected => {}
        }
    }
}

impl ClientEngine for UdpClient {
    fn connect(&mut self, request: ConnectRequest) {
        if self.state != ConnectionState::Disconnected {
            log::warn!("Client engine already connecting or connected");
            return;
        }

        self.close(None);
        if let Err(e) = self.open(&request) {
            log::warn!("Could not start connecting to {}: {}", request.address, e);
            self.pending_events
                .push_back(ClientEngineEvent::Error(e.to_string()));
            self.pending_events
                .push_back(ClientEngineEvent::Disconnected(DisconnectReason::ConnectionFailed));
            return;
        }

        self.state = ConnectionState::Connecting;
        self.connect_key = request.connect_key;
        self.max_attempts = request.max_attempts.max(1);
        self.client_salt = random_salt();
        self.last_receive_time = Instant::now();
        self.send_handshake();
    }

    fn send(&mut self, mode: DeliveryMode, payload: &[u8]) -> Result<(), EngineError> {
        if self.state != ConnectionState::Connected {
            return Err(EngineError::NotConnected);
        }
        check_payload_len(payload)?;

        let body = self.delivery.prepare(mode, payload);
        self.send_body(body)
    }

    fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            let _ = self.send_body(PacketBody::Disconnect);
        }
        self.close(None);
        self.pending_events.clear();
    }

    fn poll(&mut self, events: &mut dyn FnMut(ClientEngineEvent)) {
        let received = match self.endpoint.as_mut() {
            Some(endpoint) => endpoint.receive(),
            None => Ok(Vec::new()),
        };

        match received {
            Ok(packets) => {
                for (packet, addr) in packets {
                    if Some(addr) != self.remote_addr {
                        continue;
                    }
                    self.last_receive_time = Instant::now();
                    self.handle_packet(packet.body);
                }
            }
            Err(e) => self
                .pending_events
                .push_back(ClientEngineEvent::Error(format!("receive failed: {}", e))),
        }

        self.maintain();

        while let Some(event) = self.pending_events.pop_front() {
            events(event);
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}
