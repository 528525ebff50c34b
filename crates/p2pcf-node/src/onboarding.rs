//! First-run node creation

use p2pcf_core::config::P2pcfConfig;
use p2pcf_core::types::Indices;
use p2pcf_core::{P2pError, P2pResult};
use p2pcf_crypto::{encrypt_seed, KeyDerivation, MasterSeed, VaultParams};
use rand::distributions::{Alphanumeric, DistString};
use secrecy::SecretString;

use crate::record::{Identity, NodeConfig, NodeRecord};
use crate::registry::PeerRegistry;
use crate::store::NodeStore;

/// Create and persist a brand-new node identity.
///
/// A fresh seed is generated, sealed under `password`, and the root key at
/// `m/999'/0'/0/0` fixes the node id. Refuses to run if `store` already
/// holds a record.
pub fn create_node(
    store: &dyn NodeStore,
    display_name: Option<String>,
    password: &SecretString,
    config: &P2pcfConfig,
) -> P2pResult<(NodeRecord, MasterSeed)> {
    if store.load()?.is_some() {
        return Err(P2pError::validation("a node record already exists"));
    }

    let seed = MasterSeed::generate();
    let root = KeyDerivation::new(&seed).root_keypair()?;
    let master_public_key = root.public_key_b64()?;
    let node_id = root.node_id()?;

    let params = VaultParams {
        iterations: config.identity.pbkdf2_iterations,
    };
    let master_seed_enc = encrypt_seed(&seed, password, &params)?;

    let name = display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| random_display_name(config.identity.display_name_length));

    let record = NodeRecord {
        identity: Identity {
            name,
            node_id,
            master_seed_enc,
            master_public_key,
        },
        indices: Indices::default(),
        handshake_seq: 0,
        peers: PeerRegistry::default(),
        rooms: Vec::new(),
        pending_transfers: Vec::new(),
        config: NodeConfig {
            port: config.network.port,
            max_chunk_size: config.transfer.max_chunk_size,
        },
    };
    store.save(&record)?;

    tracing::info!(node_id = %record.identity.node_id, name = %record.identity.name, "node created");
    Ok((record, seed))
}

fn random_display_name(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len.max(1))
}
