//! Wire messages
//!
//! Every record exchanged between nodes is one variant of [`Message`],
//! serialized as UTF-8 JSON with a `"type"` tag:
//!
//! ```text
//! {"type":"handshake","from":"…","to":"…","timestamp":1714230000000,…}
//! ```
//!
//! Binary fields are base64 except `chunkHash`/`fileHash` (hex SHA-256).
//! Required string fields deserialize to `""` when absent so that the
//! receiving handler can reject them as validation errors instead of
//! failing the whole decode.

use serde::{Deserialize, Serialize};

use crate::error::{P2pError, P2pResult};

/// Closed set of message kinds understood by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Handshake(HandshakeMessage),
    HandshakeAck(HandshakeAckMessage),
    FileMetadata(FileMetadataMessage),
    FileChunk(FileChunkMessage),
    FileChunkAck(FileChunkAckMessage),
    FileChunkRequest(FileChunkRequestMessage),
    Room(RoomMessage),
}

impl Message {
    pub fn from_json(json: &str) -> P2pResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| P2pError::validation(format!("undecodable message: {e}")))
    }

    pub fn to_json(&self) -> P2pResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "handshake",
            Message::HandshakeAck(_) => "handshake_ack",
            Message::FileMetadata(_) => "file_metadata",
            Message::FileChunk(_) => "file_chunk",
            Message::FileChunkAck(_) => "file_chunk_ack",
            Message::FileChunkRequest(_) => "file_chunk_request",
            Message::Room(_) => "room",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Base64 X.509 SubjectPublicKeyInfo of the sender's ephemeral key
    #[serde(default)]
    pub ephemeral_public_key: String,
    /// Base64 DER ECDSA signature over [`HandshakeMessage::signing_payload`]
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl HandshakeMessage {
    /// Canonical string covered by the signature:
    /// `HANDSHAKE:from:to:ephemeralPublicKey:timestamp[:seq][:nonce]`
    pub fn signing_payload(&self) -> String {
        let mut payload = format!(
            "HANDSHAKE:{}:{}:{}:{}",
            self.from, self.to, self.ephemeral_public_key, self.timestamp
        );
        if let Some(seq) = self.seq {
            payload.push(':');
            payload.push_str(&seq.to_string());
        }
        if let Some(nonce) = self.nonce.as_deref().filter(|n| !n.is_empty()) {
            payload.push(':');
            payload.push_str(nonce);
        }
        payload
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAckMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub ephemeral_public_key: String,
    #[serde(default)]
    pub signature: String,
}

impl HandshakeAckMessage {
    /// `HANDSHAKE_ACK:from:to:ephemeralPublicKey:timestamp`
    pub fn signing_payload(&self) -> String {
        format!(
            "HANDSHAKE_ACK:{}:{}:{}:{}",
            self.from, self.to, self.ephemeral_public_key, self.timestamp
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    /// Hex SHA-256 of the plaintext file
    pub file_hash: String,
    /// Base64 IV || AES-GCM(lock key, file key)
    pub locked_file_key: String,
    #[serde(default)]
    pub signature: String,
}

impl FileMetadataMessage {
    /// `FILE_METADATA:fileId:fileName:fileSize:chunkSize:totalChunks:fileHash:lockedFileKey`
    pub fn signing_payload(&self) -> String {
        format!(
            "FILE_METADATA:{}:{}:{}:{}:{}:{}:{}",
            self.file_id,
            self.file_name,
            self.file_size,
            self.chunk_size,
            self.total_chunks,
            self.file_hash,
            self.locked_file_key
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkMessage {
    #[serde(default)]
    pub file_id: String,
    /// Required on the wire: an absent index cannot fall back to 0.
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Hex SHA-256 of the decoded `encrypted_chunk_data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_hash: Option<String>,
    /// Base64 IV || ciphertext || tag
    #[serde(default)]
    pub encrypted_chunk_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Receiver → sender: which chunks are stored (compact range string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkAckMessage {
    pub file_id: String,
    pub received: String,
    pub total_chunks: u32,
}

/// Receiver → sender: which chunks to resend (compact range string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkRequestMessage {
    pub file_id: String,
    pub missing: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEvent {
    Create,
    Join,
    Leave,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub from: String,
    pub room_id: String,
    pub event: RoomEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
}
