// Request Queue - admission controller facade
// Bounded, fair, crash-resilient front for a slow per-request handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::broadcaster::PositionBroadcaster;
use crate::application::health::HealthMonitor;
use crate::application::registry::{AbandonReason, Admitted, Registry, TrackedItem};
use crate::application::worker::constants::SHUTDOWN_JOIN_TIMEOUT;
use crate::application::worker::{shutdown_channel, ShutdownSender, WorkerPool};
use crate::domain::{QueueConfig, QueueStats};
use crate::error::{QueueError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{Handler, IdProvider, ProgressSink, SnapshotStore, TimeProvider};

/// One submission to the queue.
pub struct SubmitRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    /// Reserved; accepted but never used to reorder dispatch
    pub priority: i32,
    /// Extra keyword context forwarded verbatim to the handler
    pub context: serde_json::Value,
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl SubmitRequest {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            priority: 0,
            context: serde_json::Value::Null,
            progress_sink: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }
}

struct QueueRuntime {
    pool: Arc<WorkerPool>,
    shutdown_tx: ShutdownSender,
    health_handle: JoinHandle<()>,
}

/// The queue facade: admission control, result waiting, administrative
/// surface and lifecycle.
pub struct RequestQueue {
    config: QueueConfig,
    registry: Arc<Registry>,
    broadcaster: Arc<PositionBroadcaster>,
    handler: Arc<dyn Handler>,
    store: Arc<dyn SnapshotStore>,
    running: AtomicBool,
    started: Instant,
    runtime: Mutex<Option<QueueRuntime>>,
}

impl RequestQueue {
    pub fn new(
        config: QueueConfig,
        handler: Arc<dyn Handler>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self::with_providers(
            config,
            handler,
            store,
            Arc::new(SystemTimeProvider),
            Arc::new(UuidProvider),
        )
    }

    /// Construct with injected providers (deterministic tests).
    pub fn with_providers(
        config: QueueConfig,
        handler: Arc<dyn Handler>,
        store: Arc<dyn SnapshotStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.clone(), time_provider, id_provider));
        let broadcaster = Arc::new(PositionBroadcaster::new(config.num_workers));
        Self {
            config,
            registry,
            broadcaster,
            handler,
            store,
            running: AtomicBool::new(false),
            started: Instant::now(),
            runtime: Mutex::new(None),
        }
    }

    /// Start workers and the health monitor. Must be called before
    /// `submit()` admits anything.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Internal("queue already running".to_string()));
        }

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            Arc::clone(&self.broadcaster),
            shutdown_rx.clone(),
        ));
        pool.spawn_all(self.config.num_workers).await;

        let monitor = HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&pool),
            self.config.clone(),
            self.started,
        );
        let health_handle = tokio::spawn(monitor.run(shutdown_rx));

        *self.runtime.lock().unwrap() = Some(QueueRuntime {
            pool,
            shutdown_tx,
            health_handle,
        });

        info!(
            max_size = self.config.max_size,
            num_workers = self.config.num_workers,
            per_user_limit = self.config.per_user_limit,
            request_timeout_secs = self.config.request_timeout.as_secs(),
            "Request queue started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Admit a request and wait for its result, bounded by the configured
    /// request timeout.
    ///
    /// Fails fast with a capacity error when the caller's fairness limit
    /// or the global cap is exhausted. If this future is dropped before
    /// the result arrives (caller disconnect), the request is
    /// deregistered and counted as cancelled.
    pub async fn submit(&self, req: SubmitRequest) -> Result<serde_json::Value> {
        if !self.is_running() {
            return Err(QueueError::NotRunning);
        }

        let Admitted {
            entry,
            rx,
            position,
        } = self.registry.admit(req)?;

        // Guard covers every await below, including the admission
        // notification: a sink can be arbitrarily slow and the caller
        // may disconnect while it runs
        let guard = WaitGuard {
            registry: Arc::clone(&self.registry),
            entry: Arc::clone(&entry),
        };

        self.broadcaster
            .notify_queued(&self.registry, &entry, position)
            .await;

        let outcome = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(slot_result)) => slot_result,
            // Sender dropped without a value: the item was cancelled
            // (admin cancel or shutdown), already counted there
            Ok(Err(_closed)) => Err(QueueError::Cancelled),
            Err(_elapsed) => {
                // A worker may already be running this item; we do not
                // attempt to cancel the in-flight handler call
                self.registry.abandon(&entry, AbandonReason::Timeout);
                warn!(
                    request_id = %entry.item.request_id,
                    user_id = %entry.item.user_id,
                    timeout_secs = self.config.request_timeout.as_secs(),
                    "Request timed out in queue"
                );
                self.broadcaster.broadcast(&self.registry).await;
                Err(QueueError::Timeout {
                    timeout_secs: self.config.request_timeout.as_secs(),
                })
            }
        };

        // Slot is resolved on every path above, so the guard no-ops
        drop(guard);
        outcome
    }

    pub fn get_stats(&self) -> QueueStats {
        self.registry.stats(self.started.elapsed())
    }

    /// 1-based pending position, 0 when a worker has the item, None when
    /// the request is unknown or already finished.
    pub fn get_position(&self, request_id: &str) -> Option<usize> {
        self.registry.position_of(request_id)
    }

    /// Administrative cancel. The waiting caller observes `Cancelled`.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let cancelled = self.registry.cancel(request_id);
        if cancelled {
            info!(request_id, "Request cancelled by operator");
            self.broadcaster.broadcast(&self.registry).await;
        }
        cancelled
    }

    /// Best-effort snapshot of current in-flight work (signal-time flush).
    pub async fn flush_snapshot(&self) {
        let items = self.registry.persistable_items();
        match self.store.save(&items).await {
            Ok(()) => debug!(count = items.len(), "Snapshot flushed"),
            Err(e) => warn!(error = %e, "Snapshot flush failed"),
        }
    }

    /// Graceful shutdown: stop admissions, persist pending + active work,
    /// cancel waiting callers, stop workers, stop the health monitor.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Queue shutdown initiated");

        let items = self.registry.persistable_items();
        match self.store.save(&items).await {
            Ok(()) => info!(count = items.len(), "Persisted in-flight requests"),
            Err(e) => warn!(error = %e, "Failed to persist in-flight requests"),
        }

        let cancelled = self.registry.cancel_all_waiting();
        if cancelled > 0 {
            info!(cancelled, "Cancelled waiting callers");
        }

        let runtime = self.runtime.lock().unwrap().take();
        if let Some(rt) = runtime {
            rt.shutdown_tx.shutdown();
            rt.pool.join_all(SHUTDOWN_JOIN_TIMEOUT).await;
            rt.health_handle.abort();
        }

        info!("Queue shutdown complete");
        Ok(())
    }
}

/// Deregisters the item if the caller's wait is dropped while the slot
/// is still unresolved. No-ops otherwise: `abandon` only counts when it
/// takes slot ownership.
struct WaitGuard {
    registry: Arc<Registry>,
    entry: Arc<TrackedItem>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self
            .registry
            .abandon(&self.entry, AbandonReason::Cancelled)
        {
            debug!(
                request_id = %self.entry.item.request_id,
                "Caller stopped waiting, request deregistered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::handler::mocks::StubHandler;
    use crate::port::snapshot_store::mocks::MemorySnapshotStore;
    use std::time::Duration;

    fn queue_with(handler: Arc<StubHandler>, config: QueueConfig) -> RequestQueue {
        RequestQueue::new(config, handler, Arc::new(MemorySnapshotStore::new()))
    }

    #[tokio::test]
    async fn test_submit_requires_running_queue() {
        let queue = queue_with(Arc::new(StubHandler::new_success()), QueueConfig::default());
        let err = queue
            .submit(SubmitRequest::new("u1", "s1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotRunning));
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let handler = Arc::new(StubHandler::new_success());
        let queue = queue_with(handler.clone(), QueueConfig::default());
        queue.start().await.unwrap();

        let result = queue
            .submit(SubmitRequest::new("u1", "s1", "hello"))
            .await
            .unwrap();
        assert_eq!(result["response"], "hello");

        let stats = queue.get_stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(handler.call_count(), 1);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_propagates_to_caller() {
        let queue = queue_with(
            Arc::new(StubHandler::new_fail("backend unavailable")),
            QueueConfig::default(),
        );
        queue.start().await.unwrap();

        let err = queue
            .submit(SubmitRequest::new("u1", "s1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Handler(_)));
        assert!(err.to_string().contains("backend unavailable"));

        let stats = queue.get_stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.processed, 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_kill_worker() {
        let queue = queue_with(
            Arc::new(StubHandler::new_panic_inducing("boom")),
            QueueConfig::new(10, 1, 10),
        );
        queue.start().await.unwrap();

        let err = queue
            .submit(SubmitRequest::new("u1", "s1", "first"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Handler(_)));

        // The same (sole) worker must still be alive to serve this one
        let err = queue
            .submit(SubmitRequest::new("u1", "s1", "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Handler(_)));

        assert_eq!(queue.get_stats().errors, 2);
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_deregisters_and_counts() {
        let config = QueueConfig::new(10, 1, 10)
            .with_request_timeout(Duration::from_millis(100));
        let handler =
            Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
        let queue = queue_with(handler, config);
        queue.start().await.unwrap();

        let err = queue
            .submit(SubmitRequest::new("u1", "s1", "slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Timeout { .. }));

        let stats = queue.get_stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.pending, 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_drop_counts_cancelled() {
        let handler =
            Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(5)));
        // No workers: the item stays pending while the caller walks away
        let queue = Arc::new(queue_with(handler, QueueConfig::new(10, 0, 10)));
        queue.start().await.unwrap();

        let q = Arc::clone(&queue);
        let submit_task =
            tokio::spawn(async move { q.submit(SubmitRequest::new("u1", "s1", "hi")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        submit_task.abort();
        let _ = submit_task.await;

        let stats = queue.get_stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.pending, 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_drop_during_admission_notice_counts_cancelled() {
        use crate::port::{ProgressSink, SinkError};
        use async_trait::async_trait;

        // Sink slow enough that the caller disconnects mid-notification
        struct SlowSink;

        #[async_trait]
        impl ProgressSink for SlowSink {
            async fn emit(
                &self,
                _event: &str,
                _payload: serde_json::Value,
            ) -> std::result::Result<(), SinkError> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
        }

        let handler = Arc::new(StubHandler::new_success());
        let queue = Arc::new(queue_with(handler.clone(), QueueConfig::new(10, 0, 10)));
        queue.start().await.unwrap();

        let q = Arc::clone(&queue);
        let submit_task = tokio::spawn(async move {
            q.submit(SubmitRequest::new("u1", "s1", "hi").with_progress_sink(Arc::new(SlowSink)))
                .await
        });
        // Abort while submit is still inside the queued notification
        tokio::time::sleep(Duration::from_millis(100)).await;
        submit_task.abort();
        let _ = submit_task.await;

        let stats = queue.get_stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(handler.call_count(), 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_snapshot_persists_pending_work() {
        let handler =
            Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
        let store = Arc::new(MemorySnapshotStore::new());
        let queue = Arc::new(RequestQueue::new(
            QueueConfig::new(10, 0, 10),
            handler,
            store.clone(),
        ));
        queue.start().await.unwrap();

        let q = Arc::clone(&queue);
        let submit_task =
            tokio::spawn(async move { q.submit(SubmitRequest::new("u1", "s1", "hi")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.flush_snapshot().await;
        let snapshot = store.current().expect("snapshot written");
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.items[0].user_id, "u1");

        submit_task.abort();
        let _ = submit_task.await;
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_cancel_wakes_caller() {
        let handler =
            Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(5)));
        let queue = Arc::new(queue_with(handler, QueueConfig::new(10, 0, 10)));
        queue.start().await.unwrap();

        let q = Arc::clone(&queue);
        let submit_task =
            tokio::spawn(async move { q.submit(SubmitRequest::new("u1", "s1", "hi")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = queue.get_stats();
        assert_eq!(stats.pending, 1);
        let request_id = queue.registry.persistable_items()[0].request_id.clone();

        assert!(queue.cancel(&request_id).await);
        let err = submit_task.await.unwrap().unwrap_err();
        assert!(matches!(err, QueueError::Cancelled));
        assert_eq!(queue.get_stats().cancelled, 1);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_position_tracks_lifecycle() {
        let handler =
            Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
        let queue = Arc::new(queue_with(handler, QueueConfig::new(10, 1, 10)));
        queue.start().await.unwrap();

        let q1 = Arc::clone(&queue);
        let first =
            tokio::spawn(async move { q1.submit(SubmitRequest::new("u1", "s1", "a")).await });
        let q2 = Arc::clone(&queue);
        let second =
            tokio::spawn(async move { q2.submit(SubmitRequest::new("u2", "s2", "b")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // One item claimed by the sole worker, one waiting behind it
        let items = queue.registry.persistable_items();
        let positions: Vec<Option<usize>> = items
            .iter()
            .map(|i| queue.get_position(&i.request_id))
            .collect();
        assert!(positions.contains(&Some(0)));
        assert!(positions.contains(&Some(1)));
        assert_eq!(queue.get_position("unknown"), None);

        first.abort();
        second.abort();
        queue.shutdown().await.unwrap();
    }
}
