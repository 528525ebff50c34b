//! p2pcf-node: a single p2pcf node
//!
//! # Overview
//! - `record` / `store`: the persisted node record and its durable backends
//! - `onboarding`: first-run identity creation
//! - `node`: the unlocked node; every record change goes through `Node::commit`
//! - `handshake`: signed handshake and the initiator session
//! - `files`: send and receive sides of file transfer
//! - `rooms`: room membership
//! - `dispatch`: `Node::handle` over the closed message set

pub mod dispatch;
pub mod files;
pub mod handshake;
pub mod node;
pub mod onboarding;
pub mod record;
pub mod registry;
pub mod rooms;
pub mod seq_cache;
pub mod store;

pub use files::OutgoingFile;
pub use handshake::{generate_nonce, HandshakeSession, HandshakeState};
pub use node::Node;
pub use onboarding::create_node;
pub use record::{Identity, NodeConfig, NodeRecord, RoomRecord};
pub use registry::PeerRegistry;
pub use rooms::{Room, RoomManager};
pub use seq_cache::RecentSeqCache;
pub use store::{JsonNodeStore, MemoryNodeStore, NodeStore};
