// Snapshot Store Port
// Durable read/write/clear of the in-flight work snapshot. Failures are
// logged and treated as non-fatal by the queue (degraded mode, no crash
// protection).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PersistedItem, PersistedSnapshot};

#[derive(Error, Debug)]
pub enum SnapshotStoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Snapshot store trait
///
/// Implementations:
/// - FileSnapshotStore (infra-fs): atomic JSON file
/// - mocks::MemorySnapshotStore: in-memory, for tests
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the given items. An empty slice is equivalent to `clear()`.
    async fn save(&self, items: &[PersistedItem]) -> Result<(), SnapshotStoreError>;

    /// Load the current snapshot.
    ///
    /// Returns `None` when there is no snapshot, when the file is corrupt
    /// (after quarantining it), or when no valid items remain. Never
    /// fails on bad content.
    async fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotStoreError>;

    /// Idempotent delete of the snapshot.
    async fn clear(&self) -> Result<(), SnapshotStoreError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// In-memory snapshot store for tests
    pub struct MemorySnapshotStore {
        snapshot: Mutex<Option<PersistedSnapshot>>,
        save_count: Mutex<usize>,
    }

    impl MemorySnapshotStore {
        pub fn new() -> Self {
            Self {
                snapshot: Mutex::new(None),
                save_count: Mutex::new(0),
            }
        }

        pub fn current(&self) -> Option<PersistedSnapshot> {
            self.snapshot.lock().unwrap().clone()
        }

        pub fn save_count(&self) -> usize {
            *self.save_count.lock().unwrap()
        }
    }

    impl Default for MemorySnapshotStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshotStore {
        async fn save(&self, items: &[PersistedItem]) -> Result<(), SnapshotStoreError> {
            *self.save_count.lock().unwrap() += 1;
            let mut guard = self.snapshot.lock().unwrap();
            if items.is_empty() {
                *guard = None;
            } else {
                *guard = Some(PersistedSnapshot::new(items.to_vec()));
            }
            Ok(())
        }

        async fn load(&self) -> Result<Option<PersistedSnapshot>, SnapshotStoreError> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn clear(&self) -> Result<(), SnapshotStoreError> {
            *self.snapshot.lock().unwrap() = None;
            Ok(())
        }
    }
}
