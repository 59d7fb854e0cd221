// Health Monitor
// Periodic stats logging, crash-safe checkpointing while the queue is
// busy, and dead-worker detection/restart.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::registry::Registry;
use crate::application::worker::constants::{HIGH_UTILIZATION_THRESHOLD, SNAPSHOT_EVERY_TICKS};
use crate::application::worker::{ShutdownToken, WorkerPool};
use crate::domain::QueueConfig;
use crate::port::SnapshotStore;

pub struct HealthMonitor {
    registry: Arc<Registry>,
    store: Arc<dyn SnapshotStore>,
    pool: Arc<WorkerPool>,
    config: QueueConfig,
    started: Instant,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn SnapshotStore>,
        pool: Arc<WorkerPool>,
        config: QueueConfig,
        started: Instant,
    ) -> Self {
        Self {
            registry,
            store,
            pool,
            config,
            started,
        }
    }

    /// Run the monitor loop until shutdown. Should be spawned.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        let mut ticker = interval(self.config.health_log_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        let mut tick_count: u64 = 0;
        let mut last_submitted: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => break,
            }
            tick_count += 1;

            let stats = self.registry.stats(self.started.elapsed());
            let in_flight = stats.pending + stats.active;

            if in_flight > 0 || stats.submitted != last_submitted {
                info!(
                    pending = stats.pending,
                    active = stats.active,
                    submitted = stats.submitted,
                    processed = stats.processed,
                    errors = stats.errors,
                    rejected = stats.rejected,
                    timeouts = stats.timeouts,
                    cancelled = stats.cancelled,
                    throughput_per_min = format_args!("{:.1}", stats.throughput_per_min),
                    "Queue health"
                );
            }
            last_submitted = stats.submitted;

            let utilization = stats.utilization();
            if utilization > HIGH_UTILIZATION_THRESHOLD {
                warn!(
                    utilization = format_args!("{:.0}%", utilization * 100.0),
                    pending = stats.pending,
                    active = stats.active,
                    max_size = stats.max_size,
                    "Queue approaching capacity"
                );
            }

            // Periodic checkpoint bounds data loss on an unclean crash
            if tick_count % SNAPSHOT_EVERY_TICKS == 0 && in_flight > 0 {
                let items = self.registry.persistable_items();
                match self.store.save(&items).await {
                    Ok(()) => debug!(count = items.len(), "Crash-safe snapshot written"),
                    Err(e) => warn!(error = %e, "Periodic snapshot failed"),
                }
            }

            let respawned = self.pool.respawn_dead().await;
            if respawned > 0 {
                warn!(respawned, "Restarted dead workers");
            }
        }

        debug!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broadcaster::PositionBroadcaster;
    use crate::application::queue::SubmitRequest;
    use crate::application::worker::shutdown_channel;
    use crate::port::handler::mocks::StubHandler;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::snapshot_store::mocks::MemorySnapshotStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn test_periodic_snapshot_while_busy() {
        let config = QueueConfig::new(10, 1, 10)
            .with_health_log_interval(Duration::from_millis(10));
        let registry = Arc::new(Registry::new(
            config.clone(),
            Arc::new(MockTimeProvider::new(1_700_000_000_000)),
            Arc::new(SequentialIdProvider::new()),
        ));
        let store = Arc::new(MemorySnapshotStore::new());
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&registry),
            Arc::new(StubHandler::new_success()),
            Arc::new(PositionBroadcaster::new(1)),
            shutdown_rx.clone(),
        ));

        // One pending item, no workers running to drain it
        registry
            .admit(SubmitRequest::new("u1", "s1", "hello"))
            .unwrap();

        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            store.clone(),
            pool,
            config,
            Instant::now(),
        );
        let handle = tokio::spawn(monitor.run(shutdown_rx));

        // Enough ticks for at least one checkpoint (every 5th tick)
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown_tx.shutdown();
        handle.await.unwrap();

        let snapshot = store.current().expect("snapshot should exist");
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.items[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_no_snapshot_when_idle() {
        let config = QueueConfig::new(10, 1, 10)
            .with_health_log_interval(Duration::from_millis(10));
        let registry = Arc::new(Registry::new(
            config.clone(),
            Arc::new(MockTimeProvider::new(0)),
            Arc::new(SequentialIdProvider::new()),
        ));
        let store = Arc::new(MemorySnapshotStore::new());
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&registry),
            Arc::new(StubHandler::new_success()),
            Arc::new(PositionBroadcaster::new(1)),
            shutdown_rx.clone(),
        ));

        let monitor =
            HealthMonitor::new(registry, store.clone(), pool, config, Instant::now());
        let handle = tokio::spawn(monitor.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown_tx.shutdown();
        handle.await.unwrap();

        assert_eq!(store.save_count(), 0);
    }
}
