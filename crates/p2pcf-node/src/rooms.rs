//! Room membership bookkeeping driven by `room` messages

use p2pcf_core::message::{RoomEvent, RoomMessage};
use p2pcf_core::{P2pError, P2pResult};
use std::collections::{BTreeSet, HashMap};

use crate::record::RoomRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub room_id: String,
    pub members: BTreeSet<String>,
    pub room_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomManager {
    rooms: HashMap<String, Room>,
}

impl RoomManager {
    pub fn from_records(records: &[RoomRecord]) -> Self {
        let rooms = records
            .iter()
            .map(|r| {
                let room = Room {
                    room_id: r.room_id.clone(),
                    members: r.members.iter().cloned().collect(),
                    room_key: r.room_key.clone(),
                };
                (r.room_id.clone(), room)
            })
            .collect();
        Self { rooms }
    }

    /// Persistable form, ordered by room id.
    pub fn to_records(&self) -> Vec<RoomRecord> {
        let mut records: Vec<RoomRecord> = self
            .rooms
            .values()
            .map(|room| RoomRecord {
                room_id: room.room_id.clone(),
                members: room.members.iter().cloned().collect(),
                room_key: room.room_key.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        records
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Create a room with `creator` as its first member.
    pub fn create(&mut self, room_id: &str, creator: &str, room_key: Option<String>) -> P2pResult<()> {
        if room_id.is_empty() {
            return Err(P2pError::validation("room id is empty"));
        }
        if self.rooms.contains_key(room_id) {
            return Err(P2pError::validation(format!("room {room_id} already exists")));
        }
        self.rooms.insert(
            room_id.to_string(),
            Room {
                room_id: room_id.to_string(),
                members: BTreeSet::from([creator.to_string()]),
                room_key,
            },
        );
        Ok(())
    }

    /// Add a member. Returns false if they were already in the room.
    pub fn join(&mut self, room_id: &str, member: &str) -> P2pResult<bool> {
        let room = self.room_mut(room_id)?;
        Ok(room.members.insert(member.to_string()))
    }

    /// Remove a member; the room is dropped once empty. Returns false if
    /// they were not a member.
    pub fn leave(&mut self, room_id: &str, member: &str) -> P2pResult<bool> {
        let room = self.room_mut(room_id)?;
        let removed = room.members.remove(member);
        if room.members.is_empty() {
            self.rooms.remove(room_id);
        }
        Ok(removed)
    }

    pub fn is_member(&self, room_id: &str, member: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|r| r.members.contains(member))
    }

    /// Apply a received room event.
    pub fn apply(&mut self, msg: &RoomMessage) -> P2pResult<()> {
        if msg.from.is_empty() {
            return Err(P2pError::validation("room message has no sender"));
        }
        match msg.event {
            RoomEvent::Create => self.create(&msg.room_id, &msg.from, msg.room_key.clone()),
            RoomEvent::Join => self.join(&msg.room_id, &msg.from).map(|_| ()),
            RoomEvent::Leave => self.leave(&msg.room_id, &msg.from).map(|_| ()),
            RoomEvent::Message => {
                if !self.is_member(&msg.room_id, &msg.from) {
                    return Err(P2pError::authentication(format!(
                        "{} is not a member of room {}",
                        msg.from, msg.room_id
                    )));
                }
                if msg.encrypted_payload.as_deref().unwrap_or_default().is_empty() {
                    return Err(P2pError::validation("room message has no payload"));
                }
                Ok(())
            }
        }
    }

    fn room_mut(&mut self, room_id: &str) -> P2pResult<&mut Room> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| P2pError::validation(format!("unknown room {room_id}")))
    }
}
