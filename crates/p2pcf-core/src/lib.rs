//! p2pcf-core: shared types for the p2pcf node
//!
//! - `error`: the single error enum every crate returns
//! - `config`: `p2pcf.toml` schema
//! - `types`: persisted data model (peers, derivation indices)
//! - `message`: wire messages, decoded as one closed tagged union

pub mod config;
pub mod error;
pub mod message;
pub mod types;

pub use error::{P2pError, P2pResult};
pub use message::Message;

/// Current Unix time in milliseconds (wire timestamps).
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Current Unix time in seconds (peer `last_seen`).
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
