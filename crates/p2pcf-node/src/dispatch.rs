//! Top-level message dispatch

use p2pcf_core::message::{Message, RoomMessage};
use p2pcf_core::P2pResult;
use std::sync::PoisonError;

use crate::node::Node;

impl Node {
    /// Handle one decoded message received from `ip:port`.
    ///
    /// Returns the replies to send back, in order; empty when there is
    /// nothing to answer. A `handshake_ack` is not handled here: it only
    /// means something to the [`HandshakeSession`](crate::HandshakeSession)
    /// that sent the handshake.
    pub fn handle(&self, msg: &Message, ip: &str, port: u16) -> P2pResult<Vec<Message>> {
        tracing::debug!(kind = msg.kind(), ip, port, "dispatching message");
        match msg {
            Message::Handshake(h) => {
                let ack = self.receive_handshake(h, ip, port)?;
                Ok(vec![Message::HandshakeAck(ack)])
            }
            Message::FileMetadata(m) => {
                let ack = self.accept_metadata(m, None)?;
                Ok(vec![Message::FileChunkAck(ack)])
            }
            Message::FileChunk(c) => {
                let (_, ack) = self.accept_chunk(c)?;
                Ok(vec![Message::FileChunkAck(ack)])
            }
            Message::FileChunkRequest(r) => Ok(self
                .chunk_messages_for(r)?
                .into_iter()
                .map(Message::FileChunk)
                .collect()),
            Message::Room(r) => {
                self.apply_room_event(r)?;
                Ok(Vec::new())
            }
            Message::HandshakeAck(a) => {
                tracing::debug!(peer = %a.from, "handshake_ack outside a session ignored");
                Ok(Vec::new())
            }
            Message::FileChunkAck(a) => {
                tracing::debug!(file_id = %a.file_id, received = %a.received, "chunk ack");
                Ok(Vec::new())
            }
        }
    }

    /// Apply a room event and persist the resulting room list.
    ///
    /// The event is applied to a copy first, so a rejected event or a failed
    /// save leaves the live rooms untouched.
    pub fn apply_room_event(&self, msg: &RoomMessage) -> P2pResult<()> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = rooms.clone();
        next.apply(msg)?;

        let records = next.to_records();
        self.commit("apply room event", |r| {
            r.rooms = records;
            Ok(())
        })?;
        *rooms = next;

        tracing::debug!(room = %msg.room_id, from = %msg.from, event = ?msg.event, "room event applied");
        Ok(())
    }

    pub fn is_room_member(&self, room_id: &str, member: &str) -> bool {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_member(room_id, member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use p2pcf_core::message::{FileChunkAckMessage, FileChunkRequestMessage, RoomEvent};
    use p2pcf_crypto::generate_file_key;
    use p2pcf_core::P2pError;
    use std::sync::atomic::Ordering;

    fn room(from: &str, event: RoomEvent) -> Message {
        Message::Room(RoomMessage {
            from: from.into(),
            room_id: "lobby".into(),
            event,
            room_key: None,
            encrypted_payload: None,
        })
    }

    #[test]
    fn test_room_events_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (node, _) = test_node(dir.path());

        assert!(node.handle(&room("alice", RoomEvent::Create), "ip", 1).unwrap().is_empty());
        node.handle(&room("bob", RoomEvent::Join), "ip", 1).unwrap();
        assert!(node.is_room_member("lobby", "bob"));

        let rooms = node.record().rooms;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].members, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_room_event_rolled_back_on_save_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (node, store) = test_node(dir.path());
        node.handle(&room("alice", RoomEvent::Create), "ip", 1).unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let err = node.handle(&room("bob", RoomEvent::Join), "ip", 1).unwrap_err();
        assert!(matches!(err, P2pError::Persistence(_)));
        assert!(!node.is_room_member("lobby", "bob"));
        assert_eq!(node.record().rooms[0].members, vec!["alice".to_string()]);
    }

    #[test]
    fn test_room_message_from_outsider() {
        let dir = tempfile::tempdir().unwrap();
        let (node, _) = test_node(dir.path());
        node.handle(&room("alice", RoomEvent::Create), "ip", 1).unwrap();

        let err = node.handle(&room("mallory", RoomEvent::Message), "ip", 1).unwrap_err();
        assert!(matches!(err, P2pError::Authentication(_)));
    }

    #[test]
    fn test_chunk_request_answered_with_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (node, _) = test_node(dir.path());
        let src = dir.path().join("doc.txt");
        std::fs::write(&src, b"0123456789").unwrap();
        let out = node
            .prepare_send(&src, Some("doc".into()), 4, &generate_file_key(), |_, _| {})
            .unwrap();

        let request = Message::FileChunkRequest(FileChunkRequestMessage {
            file_id: "doc".into(),
            missing: "0,2".into(),
            total_chunks: out.chunked.total_chunks,
        });
        let replies = node.handle(&request, "ip", 1).unwrap();
        let indices: Vec<u32> = replies
            .iter()
            .map(|m| match m {
                Message::FileChunk(c) => c.chunk_index,
                other => panic!("expected file_chunk, got {}", other.kind()),
            })
            .collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_acks_need_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (node, _) = test_node(dir.path());
        let ack = Message::FileChunkAck(FileChunkAckMessage {
            file_id: "f".into(),
            received: "0-2".into(),
            total_chunks: 3,
        });
        assert!(node.handle(&ack, "ip", 1).unwrap().is_empty());
    }
}
