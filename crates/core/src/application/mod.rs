// Application Layer - queue orchestration

pub mod broadcaster;
pub mod health;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod worker;

// Re-exports
pub use broadcaster::PositionBroadcaster;
pub use health::HealthMonitor;
pub use queue::{RequestQueue, SubmitRequest};
pub use recovery::{RecoveryReport, RecoveryService, SnapshotSummary};
pub use registry::Registry;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerPool};
