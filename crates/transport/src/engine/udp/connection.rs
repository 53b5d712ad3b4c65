use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::delivery::DeliveryState;
use super::protocol::random_salt;
use crate::engine::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

/// Server-side record of one remote client.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub last_receive_time: Instant,
    pub delivery: DeliveryState,
}

impl Peer {
    pub fn new(
        addr: SocketAddr,
        id: ConnectionId,
        client_salt: u64,
        resend_after: Duration,
    ) -> Self {
        Self {
            addr,
            id,
            state: ConnectionState::ChallengeResponse,
            client_salt,
            server_salt: random_salt(),
            last_receive_time: Instant::now(),
            delivery: DeliveryState::new(resend_after),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }
}

#[derive(Debug)]
pub struct PeerManager {
    peers_by_addr: HashMap<SocketAddr, ConnectionId>,
    peers: HashMap<ConnectionId, Peer>,
    next_id: u32,
    max_peers: usize,
    timeout: Duration,
    resend_after: Duration,
}

impl PeerManager {
    pub fn new(max_peers: usize, timeout: Duration, resend_after: Duration) -> Self {
        Self {
            peers_by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_id: 1,
            max_peers,
            timeout,
            resend_after,
        }
    }

    /// Finds the peer for `addr`, or registers a new one awaiting its
    /// challenge response. A peer that reconnects with a fresh salt before
    /// finishing the handshake adopts the new salt.
    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut Peer, &'static str> {
        if let Some(&id) = self.peers_by_addr.get(&addr) {
            let peer = self.peers.get_mut(&id).ok_or("peer index out of sync")?;
            if !peer.is_connected() {
                peer.client_salt = client_salt;
            }
            return Ok(peer);
        }

        if self.peers.len() >= self.max_peers {
            return Err("Server full");
        }

        let id = self.allocate_id();
        self.peers
            .insert(id, Peer::new(addr, id, client_salt, self.resend_after));
        self.peers_by_addr.insert(addr, id);

        self.peers.get_mut(&id).ok_or("peer index out of sync")
    }

    /// Next free id after a wrap. Zero is never handed out.
    fn allocate_id(&mut self) -> ConnectionId {
        loop {
            let id = ConnectionId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.peers.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Peer> {
        let id = self.peers_by_addr.get(addr)?;
        self.peers.get_mut(id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        self.peers_by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Peer> {
        let id = self.peers_by_addr.remove(addr)?;
        self.peers.remove(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Drops silent peers and returns them.
    pub fn cleanup_timed_out(&mut self) -> Vec<Peer> {
        let timed_out: Vec<ConnectionId> = self
            .peers
            .values()
            .filter(|p| p.is_timed_out(self.timeout))
            .map(|p| p.id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn clear(&mut self) -> Vec<Peer> {
        self.peers_by_addr.clear();
        self.peers.drain().map(|(_, peer)| peer).collect()
    }

    #[cfg(test)]
    pub fn connected_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_connected()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_pending_peer_reused_by_addr() {
        let mut peers = PeerManager::new(4, Duration::from_secs(5), Duration::from_millis(100));

        let first = peers.get_or_create_pending(addr(1000), 11).unwrap().id;
        let again = peers.get_or_create_pending(addr(1000), 22).unwrap();
        assert_eq!(again.id, first);
        assert_eq!(again.client_salt, 22);

        let other = peers.get_or_create_pending(addr(1001), 33).unwrap().id;
        assert_ne!(other, first);
        assert_eq!(peers.connected_count(), 0);
    }

    #[test]
    fn test_server_full() {
        let mut peers = PeerManager::new(1, Duration::from_secs(5), Duration::from_millis(100));
        peers.get_or_create_pending(addr(1000), 1).unwrap();
        assert!(peers.get_or_create_pending(addr(1001), 2).is_err());
    }

    #[test]
    fn test_wrapped_ids_skip_live_peers() {
        let mut peers = PeerManager::new(4, Duration::from_secs(5), Duration::from_millis(100));
        let kept = peers.get_or_create_pending(addr(1000), 1).unwrap().id;
        assert_eq!(kept, ConnectionId(1));

        peers.next_id = u32::MAX;
        let last = peers.get_or_create_pending(addr(1001), 2).unwrap().id;
        assert_eq!(last, ConnectionId(u32::MAX));

        let wrapped = peers.get_or_create_pending(addr(1002), 3).unwrap().id;
        assert_eq!(wrapped, ConnectionId(2));

        assert_eq!(peers.get_by_addr_mut(&addr(1000)).unwrap().id, kept);
        assert_eq!(peers.get(kept).unwrap().addr, addr(1000));
        assert_eq!(peers.get(wrapped).unwrap().addr, addr(1002));
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut peers = PeerManager::new(4, Duration::from_secs(5), Duration::from_millis(100));
        let id = peers.get_or_create_pending(addr(1000), 1).unwrap().id;

        assert!(peers.remove(id).is_some());
        assert!(peers.get_by_addr_mut(&addr(1000)).is_none());
        assert!(peers.remove_by_addr(&addr(1000)).is_none());
    }

    #[test]
    fn test_cleanup_timed_out() {
        let mut peers = PeerManager::new(4, Duration::ZERO, Duration::from_millis(100));
        peers.get_or_create_pending(addr(1000), 1).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(peers.cleanup_timed_out().len(), 1);
        assert!(peers.get_by_addr_mut(&addr(1000)).is_none());
    }
}
