// Central Error Type for the Queue

use thiserror::Error;

/// Queue-level error type
///
/// Capacity and timeout errors are synchronous failures of `submit()`;
/// handler errors are propagated through the result slot and surface
/// from `submit()` as well. None of these corrupt shared state.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Queue is full ({max_size} requests in flight), try again later")]
    CapacityGlobal { max_size: usize },

    #[error("User {user_id} already has {limit} requests in flight")]
    CapacityUser { user_id: String, limit: usize },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Request was cancelled before completion")]
    Cancelled,

    #[error("Queue is not running")]
    NotRunning,

    #[error("Handler error: {0}")]
    Handler(#[from] crate::port::HandlerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// True for admission refusals the caller should back off and retry.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            QueueError::CapacityGlobal { .. } | QueueError::CapacityUser { .. }
        )
    }
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;
