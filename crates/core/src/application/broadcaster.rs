// Position Broadcaster
// Recomputes and pushes queue-position notifications after registry
// changes. Strictly best-effort: a caller's broken sink never affects
// the queue or other callers.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::application::registry::{Registry, TrackedItem};
use crate::application::worker::constants::DEFAULT_ETA_MS_PER_ITEM;
use crate::port::ProgressSink;

pub const EVENT_QUEUE_UPDATE: &str = "queue_update";
pub const EVENT_STATUS: &str = "status";

pub struct PositionBroadcaster {
    num_workers: usize,
}

impl PositionBroadcaster {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    /// Notify one freshly admitted caller of its starting position.
    pub async fn notify_queued(&self, registry: &Registry, entry: &TrackedItem, position: usize) {
        let Some(sink) = entry.progress_sink.as_ref() else {
            return;
        };
        let eta_secs = self.estimate_wait_secs(registry, position);
        self.emit_position(sink, entry, "queued", position, eta_secs)
            .await;
    }

    /// Notify a caller that a worker picked up its request (position 0).
    pub async fn notify_processing(&self, entry: &TrackedItem) {
        let Some(sink) = entry.progress_sink.as_ref() else {
            return;
        };
        self.emit_position(sink, entry, "processing", 0, 0).await;
    }

    /// Recompute positions for every still-pending caller and push an
    /// update to each one that registered a sink.
    pub async fn broadcast(&self, registry: &Registry) {
        let updates = registry.position_updates();
        for (entry, position) in updates {
            if let Some(sink) = entry.progress_sink.as_ref() {
                let eta_secs = self.estimate_wait_secs(registry, position);
                self.emit_position(sink, &entry, "queued", position, eta_secs)
                    .await;
            }
        }
    }

    fn estimate_wait_secs(&self, registry: &Registry, position: usize) -> u64 {
        let per_item_ms = registry
            .mean_handler_ms()
            .unwrap_or(DEFAULT_ETA_MS_PER_ITEM);
        (position as u64 * per_item_ms) / (self.num_workers as u64) / 1000
    }

    async fn emit_position(
        &self,
        sink: &Arc<dyn ProgressSink>,
        entry: &TrackedItem,
        status: &str,
        position: usize,
        eta_secs: u64,
    ) {
        let payload = json!({
            "request_id": entry.item.request_id,
            "position": position,
            "status": status,
            "estimated_wait": eta_secs,
        });
        if let Err(e) = sink.emit(EVENT_QUEUE_UPDATE, payload).await {
            debug!(
                request_id = %entry.item.request_id,
                error = %e,
                "Progress sink rejected queue update"
            );
        }

        let text = match status {
            "processing" => "Your request is being processed".to_string(),
            _ => format!("Position {position} in queue, about {eta_secs}s wait"),
        };
        if let Err(e) = sink.emit(EVENT_STATUS, json!(text)).await {
            debug!(
                request_id = %entry.item.request_id,
                error = %e,
                "Progress sink rejected status text"
            );
        }
    }
}
