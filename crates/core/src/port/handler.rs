// Handler Port
// Abstraction for the slow, expensive per-request operation the queue
// fronts (in production: the chat backend / LLM call). The core never
// inspects its internals.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::port::progress_sink::ProgressSink;

/// Opaque handler failure, propagated verbatim to the waiting caller.
///
/// The handler's concrete error type lives outside the core; it crosses
/// the port boundary as a message string, the same way infra errors do.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Handler trait
///
/// Must be safely callable concurrently up to `num_workers` times.
/// The core never retries a failed handler call; retry policy, if any,
/// belongs to the handler or its caller.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message and return a result payload.
    ///
    /// # Arguments
    /// * `message` - opaque request payload
    /// * `session_id` - conversation identity
    /// * `progress_sink` - optional status push channel back to the caller
    /// * `context` - extra keyword context, forwarded verbatim
    async fn handle(
        &self,
        message: &str,
        session_id: &str,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        context: &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Stub handler behavior
    #[derive(Debug, Clone)]
    pub enum StubBehavior {
        /// Always succeed, echoing the message
        Succeed,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Fail only when the request message contains `needle`
        FailFor { needle: String, error: String },
    }

    /// Stub handler for testing: records invocation order, optionally
    /// sleeps to simulate a slow backend.
    pub struct StubHandler {
        behavior: StubBehavior,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl StubHandler {
        pub fn new(behavior: StubBehavior) -> Self {
            Self {
                behavior,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(StubBehavior::Succeed)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(StubBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(StubBehavior::Panic(message.into()))
        }

        pub fn new_fail_for(needle: impl Into<String>, error: impl Into<String>) -> Self {
            Self::new(StubBehavior::FailFor {
                needle: needle.into(),
                error: error.into(),
            })
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Messages in handler invocation order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Handler for StubHandler {
        async fn handle(
            &self,
            message: &str,
            _session_id: &str,
            _progress_sink: Option<Arc<dyn ProgressSink>>,
            _context: &serde_json::Value,
        ) -> Result<serde_json::Value, HandlerError> {
            self.calls.lock().unwrap().push(message.to_string());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match &self.behavior {
                StubBehavior::Succeed => Ok(serde_json::json!({ "response": message })),
                StubBehavior::Fail(msg) => Err(HandlerError::new(msg.clone())),
                StubBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for isolation testing
                }
                StubBehavior::FailFor { needle, error } => {
                    if message.contains(needle.as_str()) {
                        Err(HandlerError::new(error.clone()))
                    } else {
                        Ok(serde_json::json!({ "response": message }))
                    }
                }
            }
        }
    }
}
