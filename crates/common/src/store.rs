//! Peer registry persistence
//!
//! The registry is always read and written as one unit. [`JsonFileStore`]
//! is the production backend; [`MemoryStore`] backs tests.

use crate::types::PeerRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whole-collection registry storage
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Load every record; a store with no prior state yields an empty list
    async fn load(&self) -> Result<Vec<PeerRecord>>;

    /// Replace the stored collection
    async fn save(&self, peers: &[PeerRecord]) -> Result<()>;
}

/// Registry stored as a pretty-printed JSON array
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PeerStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<PeerRecord>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&data).map_err(|e| {
            Error::Storage(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, peers: &[PeerRecord]) -> Result<()> {
        let mut content = serde_json::to_vec_pretty(peers)?;
        content.push(b'\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| Error::Internal(format!("registry writer panicked: {}", e)))??;

        debug!("Saved {} peers to {}", peers.len(), self.path.display());
        Ok(())
    }
}

/// Write to a temp file in the target directory, then rename over the target
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Storage(format!("failed to create {}: {}", dir.display(), e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| Error::Storage(format!("failed to create temp file: {}", e)))?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Storage(format!("failed to write {}: {}", path.display(), e)))?;
    Ok(())
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct MemoryStore {
    peers: Mutex<Vec<PeerRecord>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers: Mutex::new(peers),
            saves: Mutex::new(0),
        }
    }

    /// Current contents without going through the trait
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.lock().clone()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl PeerStore for MemoryStore {
    async fn load(&self) -> Result<Vec<PeerRecord>> {
        Ok(self.peers.lock().clone())
    }

    async fn save(&self, peers: &[PeerRecord]) -> Result<()> {
        *self.peers.lock() = peers.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyPair;

    fn record(name: &str, ip: &str) -> PeerRecord {
        PeerRecord::new(
            name.to_string(),
            KeyPair {
                private_key: format!("{}-priv", name),
                public_key: format!("{}-pub", name),
            },
            vec![ip.to_string()],
        )
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("peers.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("peers.json"));

        store
            .save(&[record("alice", "10.0.0.2/32"), record("bob", "10.0.0.3/32")])
            .await
            .unwrap();
        store.save(&[record("carol", "10.0.0.4/32")]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "carol");
        assert_eq!(loaded[0].private_key.as_deref(), Some("carol-priv"));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"publicKey\": \"carol-pub\""));
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(&[record("alice", "10.0.0.2/32")]).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }
}
