// Crash recovery
// Runs once at process startup, before the queue starts admitting: loads
// a leftover snapshot, lets the operator decide, and on replay drives
// the handler directly for each recovered item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::PersistedItem;
use crate::port::{Handler, ReplyDispatcher, SnapshotStore};

/// What replay did with one recovered item
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Handler succeeded; `delivered` is true when the result went out
    /// through the reply dispatcher. Without an out-of-band route the
    /// result is computed and recorded here only - the original caller
    /// is no longer connected and never receives a live response.
    Completed { delivered: bool },
    Failed(String),
    /// Item had an empty/whitespace-only message and was not replayed
    SkippedEmpty,
}

#[derive(Debug, Clone)]
pub struct RecoveryDetail {
    pub request_id: String,
    pub session_id: String,
    pub outcome: RecoveryOutcome,
}

/// Aggregated replay result
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub processed: usize,
    pub errors: usize,
    pub details: Vec<RecoveryDetail>,
}

/// Operator-facing view of a leftover snapshot
pub struct SnapshotSummary {
    pub saved_at: DateTime<Utc>,
    pub age_secs: i64,
    pub items: Vec<PersistedItem>,
}

impl SnapshotSummary {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// One line per item for the operator prompt
    pub fn compact_lines(&self) -> Vec<String> {
        self.items.iter().map(|i| i.compact_line()).collect()
    }

    /// Full detail for the "show" option
    pub fn detail_json(&self) -> String {
        serde_json::to_string_pretty(&self.items).unwrap_or_else(|_| "[]".to_string())
    }
}

pub struct RecoveryService {
    store: Arc<dyn SnapshotStore>,
    handler: Arc<dyn Handler>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn SnapshotStore>, handler: Arc<dyn Handler>) -> Self {
        Self { store, handler }
    }

    /// Load the leftover snapshot, if any. Store failures are logged and
    /// treated as "no snapshot" - recovery never blocks startup.
    pub async fn inspect(&self) -> Option<SnapshotSummary> {
        match self.store.load().await {
            Ok(Some(snapshot)) => {
                let age_secs = snapshot.age().num_seconds();
                info!(
                    count = snapshot.count,
                    age_secs = age_secs,
                    "Found persisted snapshot from a previous run"
                );
                Some(SnapshotSummary {
                    saved_at: snapshot.saved_at,
                    age_secs,
                    items: snapshot.items,
                })
            }
            Ok(None) => None,
            Err(e) => {
                error!(error = %e, "Failed to load snapshot, continuing without recovery");
                None
            }
        }
    }

    /// Discard the snapshot without replaying.
    pub async fn discard(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear discarded snapshot");
        }
        info!("Recovered snapshot discarded");
    }

    /// Replay recovered items by driving the handler directly, bypassing
    /// admission and fairness checks - these items already consumed their
    /// fairness slot in a previous process lifetime.
    ///
    /// Every item is attempted; one failure never stops the rest. The
    /// snapshot is cleared unconditionally afterwards.
    pub async fn replay(
        &self,
        items: &[PersistedItem],
        dispatcher: Option<Arc<dyn ReplyDispatcher>>,
    ) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for item in items {
            if item.message.trim().is_empty() {
                warn!(request_id = %item.request_id, "Skipping recovered item with empty message");
                report.details.push(RecoveryDetail {
                    request_id: item.request_id.clone(),
                    session_id: item.session_id.clone(),
                    outcome: RecoveryOutcome::SkippedEmpty,
                });
                continue;
            }

            info!(
                request_id = %item.request_id,
                user_id = %item.user_id,
                "Replaying recovered request"
            );

            let outcome = match self.run_handler(item).await {
                Ok(value) => {
                    report.processed += 1;
                    let delivered = self.try_dispatch(item, &dispatcher, value).await;
                    RecoveryOutcome::Completed { delivered }
                }
                Err(reason) => {
                    report.errors += 1;
                    error!(
                        request_id = %item.request_id,
                        error = %reason,
                        "Replay failed for recovered request"
                    );
                    RecoveryOutcome::Failed(reason)
                }
            };

            report.details.push(RecoveryDetail {
                request_id: item.request_id.clone(),
                session_id: item.session_id.clone(),
                outcome,
            });
        }

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear snapshot after replay");
        }

        info!(
            processed = report.processed,
            errors = report.errors,
            total = items.len(),
            "Recovery replay complete"
        );
        report
    }

    /// Run the handler in its own task so a panicking replay is reported
    /// as a failure instead of aborting recovery of the remaining items.
    async fn run_handler(&self, item: &PersistedItem) -> Result<serde_json::Value, String> {
        let handler = Arc::clone(&self.handler);
        let message = item.message.clone();
        let session_id = item.session_id.clone();

        let joined = tokio::spawn(async move {
            handler
                .handle(&message, &session_id, None, &serde_json::Value::Null)
                .await
        })
        .await;

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) => Err(format!("replay task failed: {join_err}")),
        }
    }

    async fn try_dispatch(
        &self,
        item: &PersistedItem,
        dispatcher: &Option<Arc<dyn ReplyDispatcher>>,
        value: serde_json::Value,
    ) -> bool {
        let Some(dispatcher) = dispatcher else {
            return false;
        };
        if !dispatcher.handles(&item.session_id) {
            return false;
        }
        match dispatcher.deliver(&item.session_id, value).await {
            Ok(()) => {
                info!(
                    request_id = %item.request_id,
                    session_id = %item.session_id,
                    "Recovered result forwarded out-of-band"
                );
                true
            }
            Err(e) => {
                warn!(
                    request_id = %item.request_id,
                    error = %e,
                    "Out-of-band delivery of recovered result failed"
                );
                false
            }
        }
    }
}
