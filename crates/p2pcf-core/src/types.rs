use serde::{Deserialize, Serialize};

/// A peer that completed a handshake with this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    /// Unix timestamp (seconds) of the last accepted contact
    pub last_seen: u64,
}

/// Key namespaces with an independent derivation counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Chat,
    Room,
    File,
    Ephemeral,
}

impl IndexKind {
    /// Derivation path prefix for keys in this namespace (`"<prefix>:<index>"`).
    pub fn prefix(self) -> &'static str {
        match self {
            IndexKind::Chat => "chat",
            IndexKind::Room => "room",
            IndexKind::File => "file",
            IndexKind::Ephemeral => "ephemeral",
        }
    }

    /// Derivation path for the key at `index` in this namespace.
    pub fn path(self, index: u64) -> String {
        format!("{}:{}", self.prefix(), index)
    }
}

/// Next unused derivation index per namespace.
///
/// Counters only move forward. Callers bump and persist a counter before the
/// key derived at the old value is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indices {
    pub chat: u64,
    pub room: u64,
    pub file: u64,
    pub ephemeral: u64,
}

impl Indices {
    pub fn get(&self, kind: IndexKind) -> u64 {
        match kind {
            IndexKind::Chat => self.chat,
            IndexKind::Room => self.room,
            IndexKind::File => self.file,
            IndexKind::Ephemeral => self.ephemeral,
        }
    }

    /// Take the current index for `kind` and advance the counter.
    pub fn take(&mut self, kind: IndexKind) -> u64 {
        let slot = match kind {
            IndexKind::Chat => &mut self.chat,
            IndexKind::Room => &mut self.room,
            IndexKind::File => &mut self.file,
            IndexKind::Ephemeral => &mut self.ephemeral,
        };
        let index = *slot;
        *slot += 1;
        index
    }
}

/// An incoming transfer announced by `file_metadata` and not yet assembled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransfer {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    /// Hex SHA-256 of the plaintext, checked at assembly
    #[serde(default)]
    pub file_hash: String,
    /// Sender peer id, if known
    #[serde(default)]
    pub from: Option<String>,
    /// File key wrapped by the sender (base64 IV || ciphertext || tag)
    pub locked_file_key: String,
}
