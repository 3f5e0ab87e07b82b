use std::collections::HashMap;
use std::net::SocketAddr;

/// Connected peers and their display names, keyed by address.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<SocketAddr, String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` under `username`, replacing the name of an already registered peer.
    ///
    /// Returns the previous name if the peer was registered.
    pub fn register(&mut self, addr: SocketAddr, username: impl Into<String>) -> Option<String> {
        self.peers.insert(addr, username.into())
    }

    /// Removes `addr`, returning its name, or `None` if it was never registered.
    pub fn unregister(&mut self, addr: &SocketAddr) -> Option<String> {
        self.peers.remove(addr)
    }

    pub fn username(&self, addr: &SocketAddr) -> Option<&str> {
        self.peers.get(addr).map(String::as_str)
    }

    /// Snapshots every registered address except `excluding`.
    ///
    /// The snapshot is owned so the registry can be mutated while sending to it.
    pub fn broadcast_targets(&self, excluding: Option<&SocketAddr>) -> Vec<SocketAddr> {
        self.peers
            .keys()
            .filter(|addr| Some(*addr) != excluding)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
