//! Signed handshake
//!
//! ```text
//!   initiator                               responder
//!   Init ──reserve ephemeral index──► Sent
//!        ── handshake{from,to,ts,seq,epk,sig} ──►
//!                                           verify sig under epk (unknown peer)
//!                                           insert Peer + take ack index, one save
//!        ◄── handshake_ack{from,to,ts,epk,sig} ──
//!   Sent ──verify ack, upsert responder──► Acked
//! ```
//!
//! Any failure moves the session to `Failed`; there are no retries. Each side
//! signs with an ephemeral key derived at a freshly reserved index, and that
//! index is on disk before the key is ever used.

use p2pcf_core::message::{HandshakeAckMessage, HandshakeMessage};
use p2pcf_core::types::{IndexKind, Peer};
use p2pcf_core::{now_millis, now_secs, P2pError, P2pResult};
use p2pcf_crypto::{random_bytes, verify_from_base64};
use std::sync::PoisonError;

use crate::node::{key_reuse_risk, Node};

/// Fresh handshake nonce: base64 of 16 random bytes.
pub fn generate_nonce() -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(random_bytes::<16>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Sent,
    Acked,
    Failed,
}

impl Node {
    /// Build a signed handshake addressed to `target`.
    pub fn initiate_handshake(&self, target: &str) -> P2pResult<HandshakeMessage> {
        self.build_handshake(target, None)
    }

    pub fn initiate_with_nonce(&self, target: &str, nonce: &str) -> P2pResult<HandshakeMessage> {
        self.build_handshake(target, Some(nonce.to_string()))
    }

    /// Handshake to a peer that is already in the registry.
    pub fn initiate_reconnect(&self, peer_id: &str) -> P2pResult<HandshakeMessage> {
        if self.peer(peer_id).is_none() {
            return Err(P2pError::validation(format!("unknown peer {peer_id}")));
        }
        self.build_handshake(peer_id, Some(generate_nonce()))
    }

    fn build_handshake(&self, target: &str, nonce: Option<String>) -> P2pResult<HandshakeMessage> {
        if target.is_empty() {
            return Err(P2pError::validation("handshake target is empty"));
        }
        let (index, seq) = self.reserve_handshake()?;
        let key = self.key_derivation().ephemeral_keypair(index)?;

        let mut msg = HandshakeMessage {
            from: self.node_id().to_string(),
            to: target.to_string(),
            timestamp: now_millis(),
            seq: Some(seq),
            ephemeral_public_key: key.public_key_b64()?,
            signature: String::new(),
            nonce: nonce.filter(|n| !n.is_empty()),
        };
        msg.signature = key.sign_to_base64(&msg.signing_payload());

        tracing::debug!(peer = target, index, seq, "handshake built");
        Ok(msg)
    }

    /// Handle an incoming handshake from `ip:port` and produce the ack.
    ///
    /// A known sender only has `last_seen` refreshed; its signature is not
    /// checked again. An unknown sender must sign with the embedded key and
    /// must not replay a `(from, seq)` pair seen recently.
    pub fn receive_handshake(
        &self,
        msg: &HandshakeMessage,
        ip: &str,
        port: u16,
    ) -> P2pResult<HandshakeAckMessage> {
        for (field, value) in [
            ("from", &msg.from),
            ("ephemeralPublicKey", &msg.ephemeral_public_key),
            ("signature", &msg.signature),
        ] {
            if value.is_empty() {
                return Err(P2pError::validation(format!("handshake is missing {field}")));
            }
        }
        if msg.from == self.node_id() {
            return Err(P2pError::validation("handshake from this node's own id"));
        }

        let now = now_secs();
        if self.lock_record().peers.contains(&msg.from) {
            let refreshed = self
                .commit("refresh peer", |r| {
                    Ok(r.peers
                        .touch(&msg.from, now)
                        .then(|| r.indices.take(IndexKind::Ephemeral)))
                })
                .map_err(key_reuse_risk)?;
            if let Some(index) = refreshed {
                tracing::debug!(peer = %msg.from, "repeat handshake from known peer");
                return self.sign_ack(&msg.from, index);
            }
        }

        if let Some(seq) = msg.seq {
            let replayed = self
                .seq_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&msg.from, seq);
            if replayed {
                tracing::warn!(peer = %msg.from, seq, "replayed handshake rejected");
                return Err(P2pError::authentication(format!(
                    "handshake seq {seq} from {} already seen",
                    msg.from
                )));
            }
        }

        verify_from_base64(&msg.ephemeral_public_key, &msg.signing_payload(), &msg.signature)
            .map_err(|e| {
                tracing::warn!(peer = %msg.from, ip, error = %e, "handshake signature rejected");
                e
            })?;

        // The peer and the ack's ephemeral index land in one save: either
        // both are durable or the handshake is aborted with neither.
        let peer = Peer {
            node_id: msg.from.clone(),
            ip: ip.to_string(),
            port,
            last_seen: now,
        };
        let index = self
            .commit("add peer", |r| {
                r.peers.upsert(peer);
                Ok(r.indices.take(IndexKind::Ephemeral))
            })
            .map_err(key_reuse_risk)?;
        if let Some(seq) = msg.seq {
            self.seq_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(&msg.from, seq);
        }

        tracing::info!(peer = %msg.from, ip, port, "new peer authenticated");
        self.sign_ack(&msg.from, index)
    }

    /// Sign an ack with the ephemeral key at an already reserved `index`.
    fn sign_ack(&self, to: &str, index: u64) -> P2pResult<HandshakeAckMessage> {
        let key = self.key_derivation().ephemeral_keypair(index)?;

        let mut ack = HandshakeAckMessage {
            from: self.node_id().to_string(),
            to: to.to_string(),
            timestamp: now_millis(),
            ephemeral_public_key: key.public_key_b64()?,
            signature: String::new(),
        };
        ack.signature = key.sign_to_base64(&ack.signing_payload());
        Ok(ack)
    }
}

/// Initiator-side state for one handshake attempt
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    target: String,
    state: HandshakeState,
    sent: Option<HandshakeMessage>,
}

impl HandshakeSession {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: HandshakeState::Init,
            sent: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The handshake sent by [`start`](Self::start), if any.
    pub fn sent(&self) -> Option<&HandshakeMessage> {
        self.sent.as_ref()
    }

    /// Init → Sent.
    pub fn start(&mut self, node: &Node, nonce: Option<String>) -> P2pResult<HandshakeMessage> {
        if self.state != HandshakeState::Init {
            return Err(P2pError::validation(format!(
                "handshake session is {:?}, not Init",
                self.state
            )));
        }
        match node.build_handshake(&self.target, nonce) {
            Ok(msg) => {
                self.state = HandshakeState::Sent;
                self.sent = Some(msg.clone());
                Ok(msg)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    /// Sent → Acked on a valid ack from the target; anything else → Failed.
    pub fn on_ack(
        &mut self,
        node: &Node,
        ack: &HandshakeAckMessage,
        ip: &str,
        port: u16,
    ) -> P2pResult<Peer> {
        if self.state != HandshakeState::Sent {
            return Err(P2pError::validation(format!(
                "handshake session is {:?}, not Sent",
                self.state
            )));
        }
        match self.accept_ack(node, ack, ip, port) {
            Ok(peer) => {
                self.state = HandshakeState::Acked;
                tracing::info!(peer = %peer.node_id, "handshake acknowledged");
                Ok(peer)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                tracing::warn!(peer = %self.target, error = %e, "handshake ack rejected");
                Err(e)
            }
        }
    }

    fn accept_ack(
        &self,
        node: &Node,
        ack: &HandshakeAckMessage,
        ip: &str,
        port: u16,
    ) -> P2pResult<Peer> {
        if ack.ephemeral_public_key.is_empty() || ack.signature.is_empty() {
            return Err(P2pError::validation("handshake ack is missing key or signature"));
        }
        if ack.to != node.node_id() {
            return Err(P2pError::authentication(format!(
                "ack addressed to {}, not this node",
                ack.to
            )));
        }
        if ack.from != self.target {
            return Err(P2pError::authentication(format!(
                "ack from {}, expected {}",
                ack.from, self.target
            )));
        }
        verify_from_base64(&ack.ephemeral_public_key, &ack.signing_payload(), &ack.signature)?;

        let peer = Peer {
            node_id: ack.from.clone(),
            ip: ip.to_string(),
            port,
            last_seen: now_secs(),
        };
        node.commit("add acknowledging peer", |r| {
            r.peers.upsert(peer.clone());
            Ok(())
        })?;
        Ok(peer)
    }
}
