//! Durable storage backends for cache snapshots.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::SnapshotError;

/// File name of the snapshot inside the cache directory.
pub const SNAPSHOT_FILE: &str = "cache-snapshot.json";

/// Where the serialized snapshot blob lives between process runs.
pub trait SnapshotStorage: Send + Sync {
    /// Read the stored blob, `None` if nothing has been written yet.
    fn load(&self) -> Result<Option<String>, SnapshotError>;

    /// Replace the stored blob.
    fn save(&self, blob: &str) -> Result<(), SnapshotError>;

    /// Remove the stored blob. Erasing a missing blob is not an error.
    fn erase(&self) -> Result<(), SnapshotError>;
}

/// Snapshot kept as a single JSON file in the cache directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStorage {
    path: PathBuf,
}

impl FileSnapshotStorage {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl SnapshotStorage for FileSnapshotStorage {
    fn load(&self) -> Result<Option<String>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?))
    }

    fn save(&self, blob: &str) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash mid-write never leaves a torn snapshot.
        let tmp = self.temp_path();
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = blob.len(), "Snapshot written");
        Ok(())
    }

    fn erase(&self) -> Result<(), SnapshotError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory snapshot slot. Clones share the slot.
///
/// Writes can be switched to fail, to exercise the store's handling of a
/// broken disk without touching the filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStorage {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    blob: Option<String>,
    fail_writes: bool,
    writes: usize,
}

impl MemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `blob` already stored.
    pub fn with_blob(blob: impl Into<String>) -> Self {
        let storage = Self::new();
        storage.slot().blob = Some(blob.into());
        storage
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.slot().fail_writes = fail;
    }

    pub fn blob(&self) -> Option<String> {
        self.slot().blob.clone()
    }

    /// Number of successful saves so far.
    pub fn writes(&self) -> usize {
        self.slot().writes
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, MemorySlot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotStorage for MemorySnapshotStorage {
    fn load(&self) -> Result<Option<String>, SnapshotError> {
        Ok(self.slot().blob.clone())
    }

    fn save(&self, blob: &str) -> Result<(), SnapshotError> {
        let mut slot = self.slot();
        if slot.fail_writes {
            return Err(SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        slot.blob = Some(blob.to_string());
        slot.writes += 1;
        Ok(())
    }

    fn erase(&self) -> Result<(), SnapshotError> {
        let mut slot = self.slot();
        if slot.fail_writes {
            return Err(SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated erase failure",
            )));
        }
        slot.blob = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSnapshotStorage::new(dir.path().join("nested"));

        assert!(storage.load().unwrap().is_none());
        storage.save("{\"a\":1}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(!storage.temp_path().exists());

        storage.erase().unwrap();
        assert!(storage.load().unwrap().is_none());
        // Erasing twice is fine
        storage.erase().unwrap();
    }

    #[test]
    fn test_memory_storage_failure_switch() {
        let storage = MemorySnapshotStorage::new();
        storage.save("one").unwrap();
        storage.set_fail_writes(true);
        assert!(storage.save("two").is_err());
        assert_eq!(storage.blob().as_deref(), Some("one"));
        assert_eq!(storage.writes(), 1);
    }
}
