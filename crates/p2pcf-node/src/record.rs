//! The persisted node record
//!
//! One JSON document holds everything that must survive a restart: the sealed
//! identity, derivation counters, known peers, rooms and pending transfers.
//! It is always rewritten whole.

use p2pcf_core::types::{Indices, PendingTransfer};
use p2pcf_crypto::EncryptedSeed;
use serde::{Deserialize, Serialize};

use crate::registry::PeerRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Display name
    pub name: String,
    /// Hex SHA-256 of the root public key's SPKI DER
    pub node_id: String,
    pub master_seed_enc: EncryptedSeed,
    /// Base64 SPKI of the root key at `m/999'/0'/0/0`
    pub master_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub port: u16,
    pub max_chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub identity: Identity,
    #[serde(default)]
    pub indices: Indices,
    /// Last `seq` placed on an outgoing handshake
    #[serde(default)]
    pub handshake_seq: u64,
    #[serde(default)]
    pub peers: PeerRegistry,
    #[serde(default)]
    pub rooms: Vec<RoomRecord>,
    #[serde(default)]
    pub pending_transfers: Vec<PendingTransfer>,
    pub config: NodeConfig,
}

impl NodeRecord {
    pub fn pending_transfer(&self, file_id: &str) -> Option<&PendingTransfer> {
        self.pending_transfers.iter().find(|p| p.file_id == file_id)
    }

    /// Insert or replace the pending transfer with the same file id.
    pub fn upsert_pending_transfer(&mut self, pending: PendingTransfer) {
        match self
            .pending_transfers
            .iter_mut()
            .find(|p| p.file_id == pending.file_id)
        {
            Some(slot) => *slot = pending,
            None => self.pending_transfers.push(pending),
        }
    }

    pub fn remove_pending_transfer(&mut self, file_id: &str) -> Option<PendingTransfer> {
        let pos = self
            .pending_transfers
            .iter()
            .position(|p| p.file_id == file_id)?;
        Some(self.pending_transfers.remove(pos))
    }
}
