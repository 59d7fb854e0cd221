// Queue Configuration Domain Model

use std::time::Duration;

/// Immutable per-queue policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Global cap on pending + active requests
    pub max_size: usize,
    /// Number of concurrent worker tasks
    pub num_workers: usize,
    /// Cap on a single user's pending + active requests
    pub per_user_limit: usize,
    /// How long a caller waits on its result slot before timing out
    pub request_timeout: Duration,
    /// Health monitor tick interval
    pub health_log_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            num_workers: 3,
            per_user_limit: 3,
            request_timeout: Duration::from_secs(300),
            health_log_interval: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    pub fn new(max_size: usize, num_workers: usize, per_user_limit: usize) -> Self {
        Self {
            max_size,
            num_workers,
            per_user_limit,
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_health_log_interval(mut self, interval: Duration) -> Self {
        self.health_log_interval = interval;
        self
    }
}
