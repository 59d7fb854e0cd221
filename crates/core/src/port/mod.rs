// Port Layer - Interfaces for external collaborators

pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod progress_sink;
pub mod reply_dispatcher;
pub mod snapshot_store;
pub mod time_provider;

// Re-exports
pub use handler::{Handler, HandlerError};
pub use id_provider::IdProvider;
pub use progress_sink::{ProgressSink, SinkError};
pub use reply_dispatcher::{DispatchError, ReplyDispatcher};
pub use snapshot_store::{SnapshotStore, SnapshotStoreError};
pub use time_provider::TimeProvider;
