// Queue Statistics Domain Model

use serde::Serialize;

/// Aggregate statistics returned by `RequestQueue::get_stats()`.
///
/// Lifetime counters obey the conservation identity at quiescence:
/// submitted == processed + errors + rejected + timeouts + cancelled.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    // Config echo
    pub max_size: usize,
    pub num_workers: usize,
    pub per_user_limit: usize,
    pub request_timeout_secs: u64,

    // Current state
    pub pending: usize,
    pub active: usize,

    // Lifetime counters
    pub submitted: u64,
    pub processed: u64,
    pub errors: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub cancelled: u64,

    // Peaks
    pub peak_pending: usize,
    pub peak_active: usize,

    // Derived
    pub throughput_per_min: f64,
    pub uptime_secs: u64,
}

impl QueueStats {
    /// Fraction of global capacity currently in use
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        (self.pending + self.active) as f64 / self.max_size as f64
    }
}
