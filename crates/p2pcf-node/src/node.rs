//! The unlocked node
//!
//! A [`Node`] owns the decrypted master seed and the in-memory copy of the
//! node record. Every change to the record goes through [`Node::commit`]:
//! the mutation is applied and saved under one lock, and reverted from a
//! snapshot if the save fails, so memory never runs ahead of disk.

use p2pcf_core::config::P2pcfConfig;
use p2pcf_core::types::{IndexKind, Indices, PendingTransfer, Peer};
use p2pcf_core::{P2pError, P2pResult};
use p2pcf_crypto::{decrypt_seed, encrypt_seed, EcKeyPair, KeyDerivation, MasterSeed, VaultParams};
use p2pcf_transfer::TransferManager;
use secrecy::SecretString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::onboarding::create_node;
use crate::record::NodeRecord;
use crate::rooms::RoomManager;
use crate::seq_cache::RecentSeqCache;
use crate::store::NodeStore;

pub struct Node {
    store: Box<dyn NodeStore>,
    record: Mutex<NodeRecord>,
    seed: MasterSeed,
    node_id: String,
    master_public_key: String,
    vault_params: VaultParams,
    pub(crate) seq_cache: Mutex<RecentSeqCache>,
    pub(crate) rooms: Mutex<RoomManager>,
    transfers: TransferManager,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Onboard a new node into `store` and return it unlocked.
    pub fn create(
        store: Box<dyn NodeStore>,
        display_name: Option<String>,
        password: &SecretString,
        config: &P2pcfConfig,
    ) -> P2pResult<Self> {
        let (record, seed) = create_node(store.as_ref(), display_name, password, config)?;
        Self::from_parts(store, record, seed, config)
    }

    /// Load the stored record and decrypt its seed with `password`.
    pub fn unlock(
        store: Box<dyn NodeStore>,
        password: &SecretString,
        config: &P2pcfConfig,
    ) -> P2pResult<Self> {
        let record = store
            .load()?
            .ok_or_else(|| P2pError::validation("no node record found; create the node first"))?;
        let seed = decrypt_seed(&record.identity.master_seed_enc, password).map_err(|e| {
            tracing::warn!(error = %e, "node unlock failed");
            e
        })?;
        Self::from_parts(store, record, seed, config)
    }

    fn from_parts(
        store: Box<dyn NodeStore>,
        record: NodeRecord,
        seed: MasterSeed,
        config: &P2pcfConfig,
    ) -> P2pResult<Self> {
        let root = KeyDerivation::new(&seed).root_keypair()?;
        let node_id = root.node_id()?;
        if node_id != record.identity.node_id {
            return Err(P2pError::Integrity(format!(
                "stored node id {} does not match the sealed seed ({node_id})",
                record.identity.node_id
            )));
        }

        let transfers = TransferManager::open(
            &config.work_dir(),
            config.transfer.max_chunk_size,
            config.transfer.max_total_chunks,
        )?;
        let rooms = RoomManager::from_records(&record.rooms);

        tracing::info!(node_id = %node_id, peers = record.peers.len(), "node unlocked");
        Ok(Self {
            store,
            master_public_key: record.identity.master_public_key.clone(),
            record: Mutex::new(record),
            seed,
            node_id,
            vault_params: VaultParams {
                iterations: config.identity.pbkdf2_iterations,
            },
            seq_cache: Mutex::new(RecentSeqCache::new(config.network.seq_cache_capacity)),
            rooms: Mutex::new(rooms),
            transfers,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Base64 SPKI of the long-term root key.
    pub fn master_public_key(&self) -> &str {
        &self.master_public_key
    }

    pub fn display_name(&self) -> String {
        self.lock_record().identity.name.clone()
    }

    /// A copy of the current record.
    pub fn record(&self) -> NodeRecord {
        self.lock_record().clone()
    }

    pub fn indices(&self) -> Indices {
        self.lock_record().indices
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.lock_record().peers.list()
    }

    pub fn peer(&self, node_id: &str) -> Option<Peer> {
        self.lock_record().peers.get(node_id)
    }

    pub fn pending_transfers(&self) -> Vec<PendingTransfer> {
        self.lock_record().pending_transfers.clone()
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    pub fn key_derivation(&self) -> KeyDerivation<'_> {
        KeyDerivation::new(&self.seed)
    }

    pub fn root_keypair(&self) -> P2pResult<EcKeyPair> {
        self.key_derivation().root_keypair()
    }

    /// Apply `f` to the record and persist it, all under the node lock.
    ///
    /// If `f` fails or the save fails the record is restored to its prior
    /// state. Save failures surface as [`P2pError::Persistence`].
    pub fn commit<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut NodeRecord) -> P2pResult<T>,
    ) -> P2pResult<T> {
        let mut record = self.lock_record();
        let snapshot = record.clone();

        let value = match f(&mut record) {
            Ok(v) => v,
            Err(e) => {
                *record = snapshot;
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&record) {
            *record = snapshot;
            tracing::warn!(what, error = %e, "node record save failed, rolled back");
            return Err(match e {
                P2pError::Persistence(_) => e,
                other => P2pError::persistence(format!("{what}: {other}")),
            });
        }
        Ok(value)
    }

    /// Take the next derivation index of `kind`, durably.
    ///
    /// The index is only returned once the advanced counter is on disk; if
    /// that fails the counter is unchanged and no key may be derived.
    pub fn reserve_index(&self, kind: IndexKind) -> P2pResult<u64> {
        self.commit("reserve index", |r| Ok(r.indices.take(kind)))
            .map_err(key_reuse_risk)
    }

    /// Reserve an ephemeral index together with the next outgoing `seq`.
    pub(crate) fn reserve_handshake(&self) -> P2pResult<(u64, u64)> {
        self.commit("reserve handshake", |r| {
            let index = r.indices.take(IndexKind::Ephemeral);
            r.handshake_seq += 1;
            Ok((index, r.handshake_seq))
        })
        .map_err(key_reuse_risk)
    }

    /// Re-seal the master seed under a new password.
    pub fn change_password(&self, old: &SecretString, new: &SecretString) -> P2pResult<()> {
        let sealed = self.lock_record().identity.master_seed_enc.clone();
        let seed = decrypt_seed(&sealed, old).map_err(|e| {
            tracing::warn!(error = %e, "password change rejected");
            e
        })?;
        let resealed = encrypt_seed(&seed, new, &self.vault_params)?;

        self.commit("change password", |r| {
            r.identity.master_seed_enc = resealed;
            Ok(())
        })?;
        tracing::info!(node_id = %self.node_id, "password changed");
        Ok(())
    }

    pub(crate) fn lock_record(&self) -> MutexGuard<'_, NodeRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn key_reuse_risk(e: P2pError) -> P2pError {
    match e {
        P2pError::Persistence(msg) => P2pError::Persistence(format!(
            "derivation counter not persisted, refusing to use index: {msg}"
        )),
        other => other,
    }
}
