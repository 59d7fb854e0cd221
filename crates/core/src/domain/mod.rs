// Domain Layer - Pure queue entities and policy

pub mod config;
pub mod error;
pub mod item;
pub mod snapshot;
pub mod stats;

// Re-exports
pub use config::QueueConfig;
pub use error::DomainError;
pub use item::{QueueItem, RequestId, SessionId, UserId};
pub use snapshot::{PersistedItem, PersistedSnapshot};
pub use stats::QueueStats;
