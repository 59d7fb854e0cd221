// Reply Dispatcher Port
// Used only during crash recovery: forwards a recovered result to an
// out-of-band channel (e.g. a messaging platform) for sessions whose
// original connection is gone.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct DispatchError(String);

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Reply dispatcher trait
///
/// Whether a session has an out-of-band route is a property of the
/// messaging integration (platform-prefixed session identifiers), so the
/// check lives behind this port rather than in the queue core.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// True if this dispatcher can deliver to the given session
    fn handles(&self, session_id: &str) -> bool;

    /// Forward a recovered result to the session's out-of-band channel
    async fn deliver(
        &self,
        session_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), DispatchError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Dispatcher that claims sessions with a fixed prefix and records
    /// every delivery.
    pub struct RecordingDispatcher {
        prefix: String,
        deliveries: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingDispatcher {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                deliveries: Mutex::new(Vec::new()),
            }
        }

        pub fn deliveries(&self) -> Vec<(String, serde_json::Value)> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplyDispatcher for RecordingDispatcher {
        fn handles(&self, session_id: &str) -> bool {
            session_id.starts_with(&self.prefix)
        }

        async fn deliver(
            &self,
            session_id: &str,
            payload: serde_json::Value,
        ) -> Result<(), DispatchError> {
            self.deliveries
                .lock()
                .unwrap()
                .push((session_id.to_string(), payload));
            Ok(())
        }
    }
}
