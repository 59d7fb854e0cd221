// Worker - request execution loop

pub mod constants;
mod pool;
mod shutdown;

pub use pool::WorkerPool;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::Arc;
use std::time::Instant;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::application::broadcaster::PositionBroadcaster;
use crate::application::registry::{Registry, TrackedItem, WorkOutcome};
use crate::error::QueueError;
use crate::port::{Handler, HandlerError};
use constants::IDLE_SLEEP_DURATION;

/// One worker: pulls admitted items FIFO, invokes the handler, resolves
/// the caller's result slot and cleans up registry bookkeeping.
pub struct Worker {
    id: usize,
    registry: Arc<Registry>,
    handler: Arc<dyn Handler>,
    broadcaster: Arc<PositionBroadcaster>,
}

impl Worker {
    pub fn new(
        id: usize,
        registry: Arc<Registry>,
        handler: Arc<dyn Handler>,
        broadcaster: Arc<PositionBroadcaster>,
    ) -> Self {
        Self {
            id,
            registry,
            handler,
            broadcaster,
        }
    }

    /// Run the worker loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        debug!(worker = self.id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if !self.process_next().await {
                // No item available; short poll so shutdown stays responsive
                tokio::select! {
                    _ = sleep(IDLE_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }

    /// Process the next dispatchable item. Returns false when the
    /// dispatch queue is empty.
    pub async fn process_next(&self) -> bool {
        let Some(entry) = self.registry.claim_next() else {
            return false;
        };

        info!(
            worker = self.id,
            request_id = %entry.item.request_id,
            user_id = %entry.item.user_id,
            "Processing request"
        );
        self.broadcaster.notify_processing(&entry).await;
        // Claiming shifted everyone behind this item forward
        self.broadcaster.broadcast(&self.registry).await;

        let started = Instant::now();
        let outcome = self.invoke_handler(&entry).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.registry.finish(&entry, outcome, duration_ms);
        self.broadcaster.broadcast(&self.registry).await;
        true
    }

    /// Invoke the handler in its own task so a panic surfaces as a
    /// JoinError instead of killing the worker loop. Handler failures
    /// are local to the item - isolation between work items is a hard
    /// requirement.
    async fn invoke_handler(&self, entry: &Arc<TrackedItem>) -> WorkOutcome {
        let handler = Arc::clone(&self.handler);
        let item = entry.item.clone();
        let sink = entry.progress_sink.clone();

        let joined = tokio::spawn(async move {
            handler
                .handle(&item.message, &item.session_id, sink, &item.context)
                .await
        })
        .await;

        match joined {
            Ok(Ok(value)) => match entry.take_slot() {
                Some(tx) => {
                    let _ = tx.send(Ok(value));
                    info!(
                        worker = self.id,
                        request_id = %entry.item.request_id,
                        "Request completed"
                    );
                    WorkOutcome::Processed
                }
                None => {
                    // Caller timed out or cancelled while we were working
                    debug!(
                        request_id = %entry.item.request_id,
                        "Result discarded, caller no longer waiting"
                    );
                    WorkOutcome::AlreadyResolved
                }
            },
            Ok(Err(handler_err)) => match entry.take_slot() {
                Some(tx) => {
                    error!(
                        worker = self.id,
                        request_id = %entry.item.request_id,
                        error = %handler_err,
                        "Handler failed"
                    );
                    let _ = tx.send(Err(QueueError::Handler(handler_err)));
                    WorkOutcome::Errored
                }
                None => {
                    warn!(
                        request_id = %entry.item.request_id,
                        error = %handler_err,
                        "Handler failed after caller stopped waiting"
                    );
                    WorkOutcome::AlreadyResolved
                }
            },
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("handler panicked: {join_err}")
                } else {
                    format!("handler task cancelled: {join_err}")
                };
                error!(
                    worker = self.id,
                    request_id = %entry.item.request_id,
                    "{reason}"
                );
                match entry.take_slot() {
                    Some(tx) => {
                        let _ = tx.send(Err(QueueError::Handler(HandlerError::new(reason))));
                        WorkOutcome::Errored
                    }
                    None => WorkOutcome::AlreadyResolved,
                }
            }
        }
    }
}
