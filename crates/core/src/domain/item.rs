// Queue Item Domain Model

use serde::{Deserialize, Serialize};

/// Request ID (UUID v4, generated at admission)
pub type RequestId = String;

/// Caller identity - the fairness key for per-user limits
pub type UserId = String;

/// Conversation identity, forwarded verbatim to the handler
pub type SessionId = String;

/// One admitted unit of work.
///
/// Immutable after creation; only its collection membership (pending ->
/// active -> gone) and the terminal resolution of its result slot change
/// over its lifetime. The slot and progress sink live outside this struct
/// because they are not serializable and not meaningful across a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub session_id: SessionId,

    /// Opaque payload forwarded to the handler
    pub message: String,

    /// Epoch milliseconds at admission
    pub submitted_at: i64,

    /// Reserved field: accepted and persisted but never used to reorder
    /// dispatch. Workers pull strictly FIFO.
    pub priority: i32,

    /// Extra keyword context forwarded verbatim to the handler
    #[serde(default)]
    pub context: serde_json::Value,
}

impl QueueItem {
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
        submitted_at: i64,
        priority: i32,
        context: serde_json::Value,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            submitted_at,
            priority,
            context,
        }
    }
}
