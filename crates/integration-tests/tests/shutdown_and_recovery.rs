// Full lifecycle across a simulated restart: graceful shutdown persists
// in-flight work, the next process inspects and replays it, and the
// snapshot is cleared afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use voxbridge_core::application::{RecoveryService, RequestQueue, SubmitRequest};
use voxbridge_core::domain::QueueConfig;
use voxbridge_core::port::handler::mocks::StubHandler;
use voxbridge_core::port::reply_dispatcher::mocks::RecordingDispatcher;
use voxbridge_core::port::{ReplyDispatcher, SnapshotStore};
use voxbridge_core::QueueError;
use voxbridge_infra_fs::FileSnapshotStore;

/// Graceful shutdown writes exactly the work that was still in flight,
/// and the queue refuses admissions afterwards.
#[tokio::test]
async fn test_shutdown_persists_in_flight_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&path));

    let handler = Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
    let queue = Arc::new(RequestQueue::new(
        QueueConfig::new(10, 1, 10),
        handler,
        Arc::clone(&store),
    ));
    queue.start().await.unwrap();

    // One item claimed by the worker, two stuck behind it
    let mut tasks = JoinSet::new();
    for i in 0..3 {
        let q = Arc::clone(&queue);
        tasks.spawn(async move {
            q.submit(SubmitRequest::new(
                format!("user-{i}"),
                format!("session-{i}"),
                format!("message {i}"),
            ))
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = queue.get_stats();
    let in_flight = stats.pending + stats.active;
    assert_eq!(in_flight, 3);

    queue.shutdown().await.unwrap();

    // Waiting callers were woken with a cancellation
    while let Some(result) = tasks.join_next().await {
        assert!(matches!(result.unwrap().unwrap_err(), QueueError::Cancelled));
    }

    let snapshot = store.load().await.unwrap().expect("snapshot persisted");
    assert_eq!(snapshot.count, in_flight);

    let err = queue
        .submit(SubmitRequest::new("late", "s", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotRunning));
}

/// "Next process": recovery finds the snapshot, replays every item
/// through the handler, forwards out-of-band sessions, then clears.
#[tokio::test]
async fn test_restart_replay_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    // Previous lifetime: queue dies with work in flight
    {
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&path));
        let handler = Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
        let queue = Arc::new(RequestQueue::new(
            QueueConfig::new(10, 1, 10),
            handler,
            store,
        ));
        queue.start().await.unwrap();

        let mut tasks = JoinSet::new();
        for (user, session) in [("u1", "telegram:42"), ("u2", "web-abc")] {
            let q = Arc::clone(&queue);
            tasks.spawn(async move {
                q.submit(SubmitRequest::new(user, session, format!("from {user}")))
                    .await
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.shutdown().await.unwrap();
        while let Some(result) = tasks.join_next().await {
            assert!(matches!(result.unwrap().unwrap_err(), QueueError::Cancelled));
        }
    }

    // New lifetime: fresh store + fast handler
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&path));
    let handler = Arc::new(StubHandler::new_success());
    let recovery = RecoveryService::new(Arc::clone(&store), handler.clone());

    let summary = recovery.inspect().await.expect("snapshot found");
    assert_eq!(summary.count(), 2);

    let dispatcher = Arc::new(RecordingDispatcher::new("telegram:"));
    let report = recovery
        .replay(
            &summary.items,
            Some(dispatcher.clone() as Arc<dyn ReplyDispatcher>),
        )
        .await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(handler.call_count(), 2);

    // Only the platform-prefixed session had an out-of-band route
    let deliveries = dispatcher.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "telegram:42");

    // Snapshot gone; a second startup sees nothing to recover
    assert!(store.load().await.unwrap().is_none());
    assert!(recovery.inspect().await.is_none());
}

/// Discard path: operator chooses not to replay; the snapshot is
/// removed and the handler is never invoked.
#[tokio::test]
async fn test_discard_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&path));

    {
        let handler = Arc::new(StubHandler::new_success().with_delay(Duration::from_secs(2)));
        let queue = Arc::new(RequestQueue::new(
            QueueConfig::new(10, 0, 10),
            handler,
            Arc::clone(&store),
        ));
        queue.start().await.unwrap();

        let q = Arc::clone(&queue);
        let task =
            tokio::spawn(async move { q.submit(SubmitRequest::new("u1", "s1", "orphan")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown().await.unwrap();
        let _ = task.await;
    }

    let handler = Arc::new(StubHandler::new_success());
    let recovery = RecoveryService::new(Arc::clone(&store), handler.clone());
    let summary = recovery.inspect().await.expect("snapshot found");
    assert_eq!(summary.count(), 1);

    recovery.discard().await;

    assert!(store.load().await.unwrap().is_none());
    assert_eq!(handler.call_count(), 0);
}
