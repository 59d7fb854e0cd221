// File-backed snapshot store
// Atomic writes (tmp + rename), corrupt-file quarantine, per-item
// validation at load time.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use voxbridge_core::domain::{PersistedItem, PersistedSnapshot};
use voxbridge_core::port::{SnapshotStore, SnapshotStoreError};

/// Durable snapshot of in-flight work as a single JSON file.
///
/// A reader never observes a half-written file: saves go to a sibling
/// temporary path first and are renamed over the real one.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    }

    fn quarantine_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".corrupted");
        PathBuf::from(os)
    }

    /// Rename an unparseable file aside instead of deleting it, so it
    /// stays available for forensic inspection.
    async fn quarantine(&self) {
        let target = self.quarantine_path();
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => warn!(
                path = %self.path.display(),
                quarantined_to = %target.display(),
                "Corrupt snapshot quarantined"
            ),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to quarantine corrupt snapshot"
            ),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, items: &[PersistedItem]) -> Result<(), SnapshotStoreError> {
        if items.is_empty() {
            return self.clear().await;
        }

        let snapshot = PersistedSnapshot::new(items.to_vec());
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SnapshotStoreError::Io(e.to_string()))?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| SnapshotStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SnapshotStoreError::Io(e.to_string()))?;

        debug!(
            path = %self.path.display(),
            count = snapshot.count,
            "Snapshot written"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotStoreError::Io(e.to_string())),
        };

        let mut snapshot: PersistedSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Snapshot file is not parseable"
                );
                self.quarantine().await;
                return Ok(None);
            }
        };

        let before = snapshot.items.len();
        snapshot.items.retain(|item| item.is_valid());
        let dropped = before - snapshot.items.len();
        if dropped > 0 {
            warn!(
                dropped = dropped,
                "Dropped invalid items from loaded snapshot"
            );
        }

        if snapshot.items.is_empty() {
            self.clear().await?;
            return Ok(None);
        }
        snapshot.count = snapshot.items.len();

        info!(
            path = %self.path.display(),
            count = snapshot.count,
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    async fn clear(&self) -> Result<(), SnapshotStoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Snapshot cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotStoreError::Io(e.to_string())),
        }
    }
}
