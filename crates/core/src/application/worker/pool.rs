// Worker Pool - owns the worker tasks and keeps the configured
// concurrency level alive (self-healing via the health monitor)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::broadcaster::PositionBroadcaster;
use crate::application::registry::Registry;
use crate::application::worker::{ShutdownToken, Worker};
use crate::port::Handler;

struct WorkerSlot {
    id: usize,
    handle: JoinHandle<()>,
}

pub struct WorkerPool {
    registry: Arc<Registry>,
    handler: Arc<dyn Handler>,
    broadcaster: Arc<PositionBroadcaster>,
    shutdown: ShutdownToken,
    workers: tokio::sync::Mutex<Vec<WorkerSlot>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        registry: Arc<Registry>,
        handler: Arc<dyn Handler>,
        broadcaster: Arc<PositionBroadcaster>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            registry,
            handler,
            broadcaster,
            shutdown,
            workers: tokio::sync::Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Spawn the configured number of worker tasks.
    pub async fn spawn_all(&self, count: usize) {
        let mut workers = self.workers.lock().await;
        for _ in 0..count {
            workers.push(self.spawn_worker());
        }
        debug!(workers = count, "Worker pool started");
    }

    fn spawn_worker(&self) -> WorkerSlot {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let worker = Worker::new(
            id,
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            Arc::clone(&self.broadcaster),
        );
        let token = self.shutdown.clone();
        WorkerSlot {
            id,
            handle: tokio::spawn(async move { worker.run(token).await }),
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Detect worker tasks that terminated unexpectedly (completed,
    /// crashed or were killed) and restart them in place, preserving the
    /// configured worker count. Returns how many were restarted.
    pub async fn respawn_dead(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let mut respawned = 0;

        let mut i = 0;
        while i < workers.len() {
            if !workers[i].handle.is_finished() {
                i += 1;
                continue;
            }
            // Remove the slot so a consumed JoinHandle is never polled twice
            let slot = workers.remove(i);
            let id = slot.id;
            let shutting_down = self.shutdown.is_shutdown();
            match slot.handle.await {
                Ok(()) if shutting_down => debug!(worker = id, "Worker drained"),
                Ok(()) => warn!(worker = id, "Worker exited unexpectedly"),
                Err(e) if e.is_panic() => error!(worker = id, error = %e, "Worker crashed"),
                Err(e) => warn!(worker = id, error = %e, "Worker task was killed"),
            }
            if !shutting_down {
                workers.insert(i, self.spawn_worker());
                respawned += 1;
                i += 1;
            }
        }

        respawned
    }

    /// Await all worker tasks, bounded by `timeout` overall (shutdown
    /// must already be signalled).
    pub async fn join_all(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock().await;
        for slot in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, slot.handle).await.is_err() {
                warn!(worker = slot.id, "Worker did not stop in time");
            }
        }
    }
}
