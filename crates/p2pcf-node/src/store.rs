//! Durable storage for the node record
//!
//! Two backends implement [`NodeStore`]:
//!   - **JSON file**: written to a sibling temp file, fsynced, renamed over
//!     the old record.
//!   - **Memory**: for tests and ephemeral nodes.
//!
//! A save either fully replaces the previous record or leaves it untouched.

use p2pcf_core::{P2pError, P2pResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::record::NodeRecord;

pub trait NodeStore: Send + Sync {
    /// The stored record, or `None` if the node was never created.
    fn load(&self) -> P2pResult<Option<NodeRecord>>;
    /// Replace the stored record, all-or-nothing.
    fn save(&self, record: &NodeRecord) -> P2pResult<()>;
}

/// Node record persisted as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonNodeStore {
    path: PathBuf,
}

impl JsonNodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl NodeStore for JsonNodeStore {
    fn load(&self) -> P2pResult<Option<NodeRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&content).map_err(|e| {
            P2pError::validation(format!("parsing node record {}: {e}", self.path.display()))
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &NodeRecord) -> P2pResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(record)?;

        // Atomic write: write to temp file, then rename
        let tmp = self.tmp_path();
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(P2pError::persistence(format!(
                "writing node record {}: {e}",
                self.path.display()
            )));
        }
        tracing::trace!(path = %self.path.display(), "node record saved");
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    record: Mutex<Option<NodeRecord>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryNodeStore {
    fn load(&self) -> P2pResult<Option<NodeRecord>> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &NodeRecord) -> P2pResult<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }
}

impl<S: NodeStore + ?Sized> NodeStore for std::sync::Arc<S> {
    fn load(&self) -> P2pResult<Option<NodeRecord>> {
        (**self).load()
    }

    fn save(&self, record: &NodeRecord) -> P2pResult<()> {
        (**self).save(record)
    }
}
