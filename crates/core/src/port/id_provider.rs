// ID Provider Port
// Request IDs come through here so tests can get predictable ones.

pub trait IdProvider: Send + Sync {
    /// Generate a unique ID for a newly admitted request
    fn generate_id(&self) -> String;
}

/// UUID v4 (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ID provider for deterministic tests (req-1, req-2, ...)
    pub struct SequentialIdProvider {
        counter: AtomicU64,
    }

    impl SequentialIdProvider {
        pub fn new() -> Self {
            Self {
                counter: AtomicU64::new(1),
            }
        }
    }

    impl Default for SequentialIdProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            format!("req-{}", self.counter.fetch_add(1, Ordering::SeqCst))
        }
    }
}
