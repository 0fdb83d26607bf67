//! Peer connection tracking.
//!
//! Maintains an in-memory map of connected peers, the address each one is
//! reached through, and whether that path is direct or goes through a
//! relay. Owned by the swarm task.

use std::collections::HashMap;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Direct,
    /// Reached through a circuit on the given relay.
    Relayed(PeerId),
}

/// Information about a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    /// The multiaddr through which we are connected.
    pub address: Multiaddr,
    pub mode: ConnectionMode,
}

impl ConnectionInfo {
    /// Classify a connection by its remote address: a `/p2p-circuit`
    /// address is relayed by the `/p2p` peer that precedes the circuit.
    pub fn new(peer_id: PeerId, address: Multiaddr) -> Self {
        let mode = match relay_of(&address) {
            Some(relay) => ConnectionMode::Relayed(relay),
            None => ConnectionMode::Direct,
        };
        Self {
            peer_id,
            address,
            mode,
        }
    }

    pub fn relay(&self) -> Option<PeerId> {
        match self.mode {
            ConnectionMode::Relayed(relay) => Some(relay),
            ConnectionMode::Direct => None,
        }
    }
}

/// The relay peer of a circuit address, `None` for direct addresses.
fn relay_of(address: &Multiaddr) -> Option<PeerId> {
    let mut relay = None;
    for protocol in address.iter() {
        match protocol {
            Protocol::P2p(peer) => relay = Some(peer),
            Protocol::P2pCircuit => return relay,
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected peer.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        let info = ConnectionInfo::new(peer_id, address);
        debug!(
            peer = %peer_id,
            addr = %info.address,
            mode = ?info.mode,
            "Tracking new peer connection"
        );
        self.peers.insert(peer_id, info);
    }

    /// Remove a peer that has fully disconnected.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    /// Mark a relayed peer as direct after a successful hole punch.
    pub fn upgrade_to_direct(&mut self, peer_id: &PeerId) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.mode = ConnectionMode::Direct;
            debug!(peer = %peer_id, "Upgraded peer connection to direct");
        }
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }
}
