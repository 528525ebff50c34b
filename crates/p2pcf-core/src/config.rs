use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{P2pError, P2pResult};

/// Top-level node configuration (loaded from p2pcf.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pcfConfig {
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub transfer: TransferConfig,
    pub network: NetworkConfig,
    pub log: LogConfig,
}

impl P2pcfConfig {
    /// Parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> P2pResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| P2pError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Path of the persisted node record.
    pub fn node_path(&self) -> PathBuf {
        self.storage.dir.join(&self.storage.node_file)
    }

    /// Directory holding chunk blobs and received-set metadata.
    pub fn work_dir(&self) -> PathBuf {
        self.storage
            .work_dir
            .clone()
            .unwrap_or_else(|| self.storage.dir.join("transfers"))
    }

    /// Effective chunk size: the request clamped to the configured maximum.
    pub fn effective_chunk_size(&self, requested: Option<usize>) -> usize {
        let requested = requested.unwrap_or(self.transfer.default_chunk_size);
        requested.min(self.transfer.max_chunk_size).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Node storage directory (default: ~/.local/share/p2pcf)
    pub dir: PathBuf,
    /// File name of the node record inside `dir`
    pub node_file: String,
    /// Chunk work directory (default: `<dir>/transfers`)
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Length of the random display name generated at onboarding
    pub display_name_length: usize,
    /// PBKDF2-HMAC-SHA256 iterations used to seal the master seed
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size used when the sender does not request one (bytes)
    pub default_chunk_size: usize,
    /// Upper bound on any requested chunk size (bytes)
    pub max_chunk_size: usize,
    /// Largest chunk count accepted in incoming file metadata
    pub max_total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Advertised listen port
    pub port: u16,
    /// Capacity of the replayed-handshake sequence cache
    pub seq_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            dir: PathBuf::from(home).join(".local/share/p2pcf"),
            node_file: "node.json".into(),
            work_dir: None,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name_length: 12,
            pbkdf2_iterations: 200_000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: 1024 * 1024,
            max_chunk_size: 1024 * 1024,
            max_total_chunks: 1 << 20,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            seq_cache_capacity: 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
