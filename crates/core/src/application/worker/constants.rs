// Queue constants (no magic values in the loops)
use std::time::Duration;

/// Sleep duration when the dispatch queue is empty (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// How long shutdown waits for worker tasks to drain (5s)
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Health monitor snapshots in-flight work every Nth tick while the
/// queue is busy, bounding data loss on an unclean crash
pub const SNAPSHOT_EVERY_TICKS: u64 = 5;

/// Utilization fraction above which the health monitor warns
pub const HIGH_UTILIZATION_THRESHOLD: f64 = 0.75;

/// Assumed per-item handler duration until real completions are observed,
/// used for estimated-wait notifications (6s)
pub const DEFAULT_ETA_MS_PER_ITEM: u64 = 6_000;

/// Upper bound on submitted message length (chars)
pub const MAX_MESSAGE_CHARS: usize = 16_384;
