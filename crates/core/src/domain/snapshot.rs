// Persisted Snapshot Domain Model
// On-disk JSON shape for crash-safe checkpoints of in-flight work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::item::QueueItem;

/// One persisted work item.
///
/// Written only from pending + active items at shutdown or checkpoint
/// time. Never contains result slots or callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedItem {
    pub request_id: String,
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    /// Epoch seconds at original admission
    pub submitted_at: i64,
    #[serde(default)]
    pub priority: i32,
}

impl PersistedItem {
    /// Required-field validation applied at load time. Items failing this
    /// are dropped individually rather than poisoning the whole snapshot.
    pub fn is_valid(&self) -> bool {
        !self.user_id.trim().is_empty()
            && !self.session_id.trim().is_empty()
            && !self.message.trim().is_empty()
    }

    /// One-line operator summary for snapshot inspection.
    pub fn compact_line(&self) -> String {
        let preview: String = self.message.chars().take(48).collect();
        format!(
            "{} user={} session={} \"{}\"",
            self.request_id, self.user_id, self.session_id, preview
        )
    }
}

impl From<&QueueItem> for PersistedItem {
    fn from(item: &QueueItem) -> Self {
        Self {
            request_id: item.request_id.clone(),
            user_id: item.user_id.clone(),
            session_id: item.session_id.clone(),
            message: item.message.clone(),
            submitted_at: item.submitted_at / 1000,
            priority: item.priority,
        }
    }
}

/// Durable snapshot of in-flight work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// ISO-8601 timestamp of the save
    pub saved_at: DateTime<Utc>,
    pub count: usize,
    pub items: Vec<PersistedItem>,
}

impl PersistedSnapshot {
    pub fn new(items: Vec<PersistedItem>) -> Self {
        Self {
            saved_at: Utc::now(),
            count: items.len(),
            items,
        }
    }

    /// Age of the snapshot at the time of the call
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.saved_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(user: &str, session: &str, message: &str) -> PersistedItem {
        PersistedItem {
            request_id: "req-1".to_string(),
            user_id: user.to_string(),
            session_id: session.to_string(),
            message: message.to_string(),
            submitted_at: 1_700_000_000,
            priority: 0,
        }
    }

    #[test]
    fn test_valid_item() {
        assert!(item("u1", "s1", "hello").is_valid());
    }

    #[test]
    fn test_invalid_items() {
        assert!(!item("", "s1", "hello").is_valid());
        assert!(!item("u1", "  ", "hello").is_valid());
        assert!(!item("u1", "s1", "").is_valid());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = PersistedSnapshot::new(vec![item("u1", "s1", "hello")]);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["count"], 1);
        assert!(json["saved_at"].is_string());
        assert_eq!(json["items"][0]["user_id"], "u1");
        assert_eq!(json["items"][0]["submitted_at"], 1_700_000_000);
        assert_eq!(json["items"][0]["priority"], 0);
    }

    #[test]
    fn test_from_queue_item_converts_millis_to_seconds() {
        let qi = QueueItem::new(
            "r1",
            "u1",
            "s1",
            "hi",
            1_700_000_000_500,
            0,
            serde_json::Value::Null,
        );
        let persisted = PersistedItem::from(&qi);
        assert_eq!(persisted.submitted_at, 1_700_000_000);
    }
}
