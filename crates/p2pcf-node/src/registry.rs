//! Known peers, keyed by node id
//!
//! Serialized as a plain array of peers. Lookups hand out clones; the only
//! way to change an entry is through the registry, which lives inside the
//! node lock.

use p2pcf_core::types::Peer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Peer>", into = "Vec<Peer>")]
pub struct PeerRegistry {
    peers: BTreeMap<String, Peer>,
}

impl From<Vec<Peer>> for PeerRegistry {
    fn from(peers: Vec<Peer>) -> Self {
        Self {
            peers: peers.into_iter().map(|p| (p.node_id.clone(), p)).collect(),
        }
    }
}

impl From<PeerRegistry> for Vec<Peer> {
    fn from(registry: PeerRegistry) -> Self {
        registry.peers.into_values().collect()
    }
}

impl PeerRegistry {
    pub fn get(&self, node_id: &str) -> Option<Peer> {
        self.peers.get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.contains_key(node_id)
    }

    /// Insert or replace; returns the previous entry.
    pub fn upsert(&mut self, peer: Peer) -> Option<Peer> {
        self.peers.insert(peer.node_id.clone(), peer)
    }

    /// Refresh `last_seen` of a known peer. Returns false if unknown.
    pub fn touch(&mut self, node_id: &str, now: u64) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// All peers ordered by node id.
    pub fn list(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
