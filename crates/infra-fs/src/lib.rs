// Voxbridge Infrastructure - Filesystem Adapter
// Implements: SnapshotStore (atomic JSON snapshot file)

mod snapshot_file;

pub use snapshot_file::FileSnapshotStore;
