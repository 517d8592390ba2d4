//! Local file backend for development and tests
//!
//! Stores each state under its own directory: the snapshot JSON, an integer
//! version sidecar, and a history copy per version. Locking uses exclusive
//! file creation, which is atomic on every platform we care about.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::backend::{BackendConfig, BackendError, BackendResult, LockTable, ObjectStore, Version};
use crate::lock::LockRecord;
use crate::snapshot::Snapshot;

/// Default state directory name
pub const DEFAULT_STATE_DIR: &str = ".pyxis";

const SNAPSHOT_FILE: &str = "snapshot.json";
const VERSION_FILE: &str = "snapshot.version";
const LOCK_FILE: &str = ".lock";
const HISTORY_DIR: &str = "history";

fn state_dir(root: &Path, state_id: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for part in state_id.split('/') {
        dir.push(part);
    }
    dir
}

fn io_err(context: &str, e: std::io::Error) -> BackendError {
    BackendError::Io(format!("{}: {}", context, e))
}

/// Local file object store
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let root = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn current_version(&self, dir: &Path) -> BackendResult<Option<u64>> {
        let version_path = dir.join(VERSION_FILE);
        if !version_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&version_path)
            .map_err(|e| io_err("Failed to read version file", e))?;
        let version = content
            .trim()
            .parse::<u64>()
            .map_err(|e| BackendError::InvalidSnapshot(format!("Bad version file: {}", e)))?;
        Ok(Some(version))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read_latest(
        &self,
        state_id: &str,
    ) -> BackendResult<Option<(Snapshot, Version)>> {
        let dir = state_dir(&self.root, state_id);
        let Some(version) = self.current_version(&dir)? else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(dir.join(SNAPSHOT_FILE))
            .map_err(|e| io_err("Failed to read snapshot", e))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| BackendError::InvalidSnapshot(e.to_string()))?;

        Ok(Some((snapshot, Version::new(version.to_string()))))
    }

    async fn write_if_version_matches(
        &self,
        state_id: &str,
        snapshot: &Snapshot,
        expected: Option<&Version>,
    ) -> BackendResult<Version> {
        let dir = state_dir(&self.root, state_id);
        std::fs::create_dir_all(dir.join(HISTORY_DIR))
            .map_err(|e| io_err("Failed to create state directory", e))?;

        let current = self.current_version(&dir)?;
        match (expected, current) {
            (None, None) => {}
            (None, Some(actual)) => {
                return Err(BackendError::conflict(state_id, None, actual.to_string()));
            }
            (Some(_), None) => {
                return Err(BackendError::conflict(state_id, expected, "(none)"));
            }
            (Some(v), Some(actual)) => {
                if v.as_str() != actual.to_string() {
                    return Err(BackendError::conflict(state_id, expected, actual.to_string()));
                }
            }
        }

        let next = current.unwrap_or(0) + 1;
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        std::fs::write(dir.join(SNAPSHOT_FILE), &content)
            .map_err(|e| io_err("Failed to write snapshot", e))?;
        // Retain every version so a corrupted write can be rolled back
        std::fs::write(
            dir.join(HISTORY_DIR).join(format!("snapshot.v{}.json", next)),
            &content,
        )
        .map_err(|e| io_err("Failed to write history copy", e))?;
        // The version sidecar is the commit point
        std::fs::write(dir.join(VERSION_FILE), next.to_string())
            .map_err(|e| io_err("Failed to write version file", e))?;

        Ok(Version::new(next.to_string()))
    }

    async fn delete(&self, state_id: &str) -> BackendResult<()> {
        let dir = state_dir(&self.root, state_id);
        for file in [SNAPSHOT_FILE, VERSION_FILE] {
            let path = dir.join(file);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| io_err("Failed to delete snapshot", e))?;
            }
        }
        Ok(())
    }

    async fn storage_exists(&self) -> BackendResult<bool> {
        Ok(self.root.exists())
    }

    async fn create_storage(&self) -> BackendResult<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| io_err("Failed to create state directory", e))
    }

    async fn init(&self) -> BackendResult<()> {
        self.create_storage().await
    }
}

/// Local file lock table
pub struct LocalLockTable {
    root: PathBuf,
}

impl LocalLockTable {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let root = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        Ok(Self::new(root))
    }

    fn lock_path(&self, lock_id: &str) -> PathBuf {
        state_dir(&self.root, lock_id).join(LOCK_FILE)
    }

    fn read_lock_file(&self, lock_id: &str) -> BackendResult<Option<LockRecord>> {
        let path = self.lock_path(lock_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| io_err("Failed to read lock file", e))?;
        let record: LockRecord = serde_json::from_str(&content)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        Ok(Some(record))
    }
}

#[async_trait]
impl LockTable for LocalLockTable {
    async fn acquire(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()> {
        let path = self.lock_path(lock_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_err("Failed to create state directory", e))?;
        }

        // create_new makes acquisition atomic across processes
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return match self.read_lock_file(lock_id)? {
                    Some(existing) => Err(BackendError::locked(&existing)),
                    None => Err(BackendError::Locked {
                        lock_id: "unknown".to_string(),
                        who: "unknown".to_string(),
                        operation: "unknown".to_string(),
                    }),
                };
            }
            Err(e) => return Err(io_err("Failed to create lock file", e)),
        };

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| io_err("Failed to write lock file", e))?;

        Ok(())
    }

    async fn release(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()> {
        let Some(existing) = self.read_lock_file(lock_id)? else {
            return Err(BackendError::LockNotFound(record.id.clone()));
        };

        if existing.id != record.id {
            return Err(BackendError::LockMismatch {
                expected: record.id.clone(),
                actual: existing.id,
            });
        }

        std::fs::remove_file(self.lock_path(lock_id))
            .map_err(|e| io_err("Failed to remove lock file", e))
    }

    async fn read_lock(&self, lock_id: &str) -> BackendResult<Option<LockRecord>> {
        self.read_lock_file(lock_id)
    }

    async fn force_unlock(&self, lock_id: &str, holder_id: &str) -> BackendResult<()> {
        let Some(existing) = self.read_lock_file(lock_id)? else {
            return Err(BackendError::LockNotFound(holder_id.to_string()));
        };

        if existing.id != holder_id {
            return Err(BackendError::LockMismatch {
                expected: holder_id.to_string(),
                actual: existing.id,
            });
        }

        std::fs::remove_file(self.lock_path(lock_id))
            .map_err(|e| io_err("Failed to remove lock file", e))
    }

    async fn init(&self) -> BackendResult<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| io_err("Failed to create state directory", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    const STATE: &str = "orbit/dev";

    #[tokio::test]
    async fn read_write_round_trip() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        assert!(store.read_latest(STATE).await.unwrap().is_none());

        let mut snapshot = Snapshot::new();
        snapshot.increment_serial();
        let v1 = store
            .write_if_version_matches(STATE, &snapshot, None)
            .await
            .unwrap();

        let (read, version) = store.read_latest(STATE).await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, snapshot.lineage);
        assert_eq!(version, v1);
    }

    #[tokio::test]
    async fn versions_strictly_increase() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        let snapshot = Snapshot::new();
        let v1 = store
            .write_if_version_matches(STATE, &snapshot, None)
            .await
            .unwrap();
        let v2 = store
            .write_if_version_matches(STATE, &snapshot, Some(&v1))
            .await
            .unwrap();

        assert_ne!(v1, v2);
        assert!(v2.as_str().parse::<u64>().unwrap() > v1.as_str().parse::<u64>().unwrap());
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        let snapshot = Snapshot::new();
        let v1 = store
            .write_if_version_matches(STATE, &snapshot, None)
            .await
            .unwrap();
        // Out-of-band write moves the version forward
        store
            .write_if_version_matches(STATE, &snapshot, Some(&v1))
            .await
            .unwrap();

        let result = store
            .write_if_version_matches(STATE, &snapshot, Some(&v1))
            .await;
        assert!(matches!(result, Err(BackendError::Conflict { .. })));

        // The newer snapshot was not overwritten
        let (_, current) = store.read_latest(STATE).await.unwrap().unwrap();
        assert_eq!(current.as_str(), "2");
    }

    #[tokio::test]
    async fn create_only_conflicts_when_present() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        let snapshot = Snapshot::new();
        store
            .write_if_version_matches(STATE, &snapshot, None)
            .await
            .unwrap();

        let result = store.write_if_version_matches(STATE, &snapshot, None).await;
        assert!(matches!(result, Err(BackendError::Conflict { .. })));
    }

    #[tokio::test]
    async fn history_copies_are_retained() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        let snapshot = Snapshot::new();
        let v1 = store
            .write_if_version_matches(STATE, &snapshot, None)
            .await
            .unwrap();
        store
            .write_if_version_matches(STATE, &snapshot, Some(&v1))
            .await
            .unwrap();

        let history = state_dir(dir.path(), STATE).join(HISTORY_DIR);
        assert!(history.join("snapshot.v1.json").exists());
        assert!(history.join("snapshot.v2.json").exists());
    }

    #[tokio::test]
    async fn different_state_ids_are_independent() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());

        let snapshot = Snapshot::new();
        store
            .write_if_version_matches("orbit/dev", &snapshot, None)
            .await
            .unwrap();

        assert!(store.read_latest("orbit/prod").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acquire_then_release() {
        let dir = tempdir().unwrap();
        let locks = LocalLockTable::new(dir.path().to_path_buf());

        let lock = LockRecord::new(STATE, "apply");
        locks.acquire(STATE, &lock).await.unwrap();

        // A second acquire fails while held
        let other = LockRecord::new(STATE, "plan");
        let result = locks.acquire(STATE, &other).await;
        assert!(matches!(result, Err(BackendError::Locked { .. })));

        locks.release(STATE, &lock).await.unwrap();

        // Now the other party can acquire
        locks.acquire(STATE, &other).await.unwrap();
        locks.release(STATE, &other).await.unwrap();
    }

    #[tokio::test]
    async fn release_by_non_holder_fails_and_keeps_lock() {
        let dir = tempdir().unwrap();
        let locks = LocalLockTable::new(dir.path().to_path_buf());

        let holder = LockRecord::new(STATE, "apply");
        locks.acquire(STATE, &holder).await.unwrap();

        let intruder = LockRecord::new(STATE, "apply");
        let result = locks.release(STATE, &intruder).await;
        assert!(matches!(result, Err(BackendError::LockMismatch { .. })));

        // The holder's lock is still in place
        let current = locks.read_lock(STATE).await.unwrap().unwrap();
        assert_eq!(current.id, holder.id);
    }

    #[tokio::test]
    async fn release_without_lock_is_not_found() {
        let dir = tempdir().unwrap();
        let locks = LocalLockTable::new(dir.path().to_path_buf());

        let lock = LockRecord::new(STATE, "apply");
        let result = locks.release(STATE, &lock).await;
        assert!(matches!(result, Err(BackendError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn force_unlock_checks_holder_token() {
        let dir = tempdir().unwrap();
        let locks = LocalLockTable::new(dir.path().to_path_buf());

        let lock = LockRecord::new(STATE, "apply");
        locks.acquire(STATE, &lock).await.unwrap();

        let result = locks.force_unlock(STATE, "wrong-token").await;
        assert!(matches!(result, Err(BackendError::LockMismatch { .. })));

        locks.force_unlock(STATE, &lock.id).await.unwrap();
        assert!(locks.read_lock(STATE).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_acquire_admits_exactly_one() {
        let dir = tempdir().unwrap();
        let locks = Arc::new(LocalLockTable::new(dir.path().to_path_buf()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            handles.push(tokio::spawn(async move {
                let record = LockRecord::new(STATE, "apply");
                locks.acquire(STATE, &record).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
    }
}
