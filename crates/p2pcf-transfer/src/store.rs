//! On-disk chunk store
//!
//! Layout inside the work directory:
//! ```text
//! <fileId>.chunk.<index>   IV || ciphertext || tag
//! <fileId>.meta            received indices, comma-separated
//! ```
//!
//! Every write goes to a sibling `.tmp` file and is renamed into place, so a
//! reader never observes a half-written blob or received-set.

use p2pcf_core::{P2pError, P2pResult};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reject ids that could escape the work directory or collide with
/// temp files: `[A-Za-z0-9._-]+`, not starting with `.`.
pub fn validate_file_id(file_id: &str) -> P2pResult<()> {
    if file_id.is_empty() {
        return Err(P2pError::validation("file id is empty"));
    }
    if file_id.starts_with('.') {
        return Err(P2pError::validation(format!(
            "file id may not start with '.': {file_id:?}"
        )));
    }
    if let Some(c) = file_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(P2pError::validation(format!(
            "file id {file_id:?} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// Chunk blobs and received-set metadata for all transfers in one directory
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Open (creating if needed) the work directory.
    pub fn open(dir: impl Into<PathBuf>) -> P2pResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, file_id: &str, index: u32) -> PathBuf {
        self.dir.join(format!("{file_id}.chunk.{index}"))
    }

    pub fn meta_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{file_id}.meta"))
    }

    pub fn write_chunk(&self, file_id: &str, index: u32, blob: &[u8]) -> P2pResult<()> {
        validate_file_id(file_id)?;
        atomic_write(&self.chunk_path(file_id, index), blob)?;
        Ok(())
    }

    pub fn read_chunk(&self, file_id: &str, index: u32) -> P2pResult<Vec<u8>> {
        validate_file_id(file_id)?;
        let path = self.chunk_path(file_id, index);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                P2pError::validation(format!("chunk {index} of {file_id} is not stored"))
            } else {
                P2pError::Io(e)
            }
        })
    }

    /// Remove a chunk blob; absent blobs are not an error.
    pub fn remove_chunk(&self, file_id: &str, index: u32) -> P2pResult<()> {
        remove_if_exists(&self.chunk_path(file_id, index))
    }

    /// Raw received-set text, `None` when no metadata exists yet.
    pub fn read_meta(&self, file_id: &str) -> P2pResult<Option<String>> {
        validate_file_id(file_id)?;
        match std::fs::read_to_string(self.meta_path(file_id)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_meta(&self, file_id: &str, contents: &str) -> P2pResult<()> {
        validate_file_id(file_id)?;
        atomic_write(&self.meta_path(file_id), contents.as_bytes())?;
        Ok(())
    }

    /// Delete every blob below `total_chunks` and the metadata for `file_id`.
    pub fn discard(&self, file_id: &str, total_chunks: u32) -> P2pResult<()> {
        validate_file_id(file_id)?;
        for index in 0..total_chunks {
            self.remove_chunk(file_id, index)?;
        }
        remove_if_exists(&self.meta_path(file_id))
    }
}

/// Sibling temp path: `<name>.tmp`.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write-then-rename; the temp file is removed if any step fails.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn remove_if_exists(path: &Path) -> P2pResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_rules() {
        for ok in ["abc", "a.b-c_d", "3f2a9c1e-0000-4000-8000-000000000000"] {
            validate_file_id(ok).unwrap();
        }
        for bad in ["", ".hidden", "..", "a/b", "../x", "a b", "名前"] {
            assert!(
                matches!(validate_file_id(bad), Err(P2pError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_chunk_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("work")).unwrap();

        store.write_chunk("f1", 3, b"blob").unwrap();
        assert_eq!(store.read_chunk("f1", 3).unwrap(), b"blob");
        assert!(dir.path().join("work/f1.chunk.3").exists());
        assert!(!dir.path().join("work/f1.chunk.3.tmp").exists());

        store.remove_chunk("f1", 3).unwrap();
        store.remove_chunk("f1", 3).unwrap();
        assert!(matches!(store.read_chunk("f1", 3), Err(P2pError::Validation(_))));
    }

    #[test]
    fn test_meta_roundtrip_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();

        assert_eq!(store.read_meta("f1").unwrap(), None);
        store.write_meta("f1", "0,1,2").unwrap();
        assert_eq!(store.read_meta("f1").unwrap().as_deref(), Some("0,1,2"));

        store.write_chunk("f1", 0, b"a").unwrap();
        store.write_chunk("f1", 1, b"b").unwrap();
        store.discard("f1", 2).unwrap();
        assert_eq!(store.read_meta("f1").unwrap(), None);
        assert!(!store.chunk_path("f1", 0).exists());
    }

    #[test]
    fn test_bad_id_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("work")).unwrap();

        assert!(store.write_chunk("../escape", 0, b"x").is_err());
        assert!(!dir.path().join("escape.chunk.0").exists());
    }
}
