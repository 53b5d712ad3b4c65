use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use tickline::engine::udp::NetworkStats;
use tickline::{
    ConnectionId, EventBuffer, TransportConfig, TransportEvent, UdpEngines, UdpTransport,
};

use crate::events::ServerEvent;

/// Sends every message straight back to its sender on the same channel.
pub struct EchoServer {
    transport: UdpTransport<EventBuffer>,
    tick: u64,
    tick_duration: Duration,
    running: Arc<AtomicBool>,
    start_time: Instant,
    messages_echoed: u64,
    pending_events: VecDeque<ServerEvent>,
}

impl EchoServer {
    pub fn new(config: TransportConfig, tick_rate: u32) -> Result<Self> {
        let mut transport = UdpTransport::new(config, UdpEngines, EventBuffer::new())?;
        if !transport.start_server() {
            bail!("could not start server on port {}", transport.config().port);
        }

        Ok(Self {
            transport,
            tick: 0,
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            messages_echoed: 0,
            pending_events: VecDeque::new(),
        })
    }

    pub fn description(&self) -> String {
        match self.transport.server_uri() {
            Some(uri) => format!("{} ({})", self.transport, uri),
            None => self.transport.to_string(),
        }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                if event.is_error() {
                    log::error!("{}", event.describe());
                } else {
                    log::info!("{}", event.describe());
                }
            }
            thread::sleep(self.tick_duration);
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        self.transport.tick();
        self.tick += 1;

        let events: Vec<TransportEvent> = self.transport.handler_mut().drain_events().collect();
        for event in events {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ServerConnected(connection) => {
                self.pending_events.push_back(ServerEvent::ClientConnected {
                    connection,
                    addr: self.transport.client_socket_addr(connection),
                });
            }
            TransportEvent::ServerDisconnected { connection, reason } => {
                self.pending_events
                    .push_back(ServerEvent::ClientDisconnected { connection, reason });
            }
            TransportEvent::ServerData {
                connection,
                payload,
                channel,
            } => {
                if self.transport.send_to_client(connection, channel, &payload) {
                    self.messages_echoed += 1;
                    self.pending_events.push_back(ServerEvent::Echoed {
                        connection,
                        channel,
                        len: payload.len(),
                    });
                }
            }
            TransportEvent::ServerError { connection, error } => {
                let message = match connection {
                    Some(connection) => format!("Client {}: {}", connection, error),
                    None => error.to_string(),
                };
                self.pending_events.push_back(ServerEvent::Error { message });
            }
            TransportEvent::ClientConnected
            | TransportEvent::ClientDisconnected(_)
            | TransportEvent::ClientData { .. }
            | TransportEvent::ClientError(_) => {}
        }
    }

    pub fn kick_client(&mut self, connection: ConnectionId) {
        self.transport.disconnect_peer(connection);
    }

    pub fn shutdown(&mut self) {
        self.transport.shutdown();
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: self.transport.connected_clients().len(),
            max_clients: self.transport.config().max_connections,
            messages_echoed: self.messages_echoed,
            network_stats: self
                .transport
                .server_engine()
                .and_then(|engine| engine.stats())
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.transport
            .connected_clients()
            .into_iter()
            .map(|connection| ClientInfo {
                connection,
                addr: self
                    .transport
                    .client_socket_addr(connection)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub messages_echoed: u64,
    pub network_stats: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub connection: ConnectionId,
    pub addr: String,
}
