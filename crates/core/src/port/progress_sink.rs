// Progress Sink Port
// Push channel for status/position updates back to the original caller.
// Failures here are always non-fatal to the queue.

use async_trait::async_trait;
use thiserror::Error;

/// Sink delivery failure. The core logs these at debug level and moves on.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SinkError(String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Progress sink trait
///
/// Events emitted by the core:
/// - `queue_update`: `{ position, request_id, status: queued|processing,
///   estimated_wait }`
/// - `status`: human-readable status string
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), SinkError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every emitted event for assertions
    pub struct RecordingSink {
        events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn events(&self) -> Vec<(String, serde_json::Value)> {
            self.events.lock().unwrap().clone()
        }

        /// Payloads of all events with the given name
        pub fn payloads_for(&self, event: &str) -> Vec<serde_json::Value> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), SinkError> {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
            Ok(())
        }
    }

    /// Always fails; used to verify sink errors are swallowed
    pub struct FailingSink;

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn emit(&self, _event: &str, _payload: serde_json::Value) -> Result<(), SinkError> {
            Err(SinkError::new("sink unavailable"))
        }
    }
}
