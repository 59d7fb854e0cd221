//! Voxbridge Queue Daemon - Main Entry Point
//! Composition root: wires the snapshot store, recovery, queue and
//! signal handling together. The real chat backend plugs in through the
//! Handler port; this binary ships a stub so the queue can run alone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voxbridge_core::application::{RecoveryService, RequestQueue, SnapshotSummary};
use voxbridge_core::domain::QueueConfig;
use voxbridge_core::port::{Handler, HandlerError, ProgressSink, SnapshotStore};
use voxbridge_infra_fs::FileSnapshotStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PERSIST_PATH: &str = "~/.voxbridge/queue_snapshot.json";

/// Placeholder for the chat backend. Integration point: replace with the
/// real upstream handler when embedding the queue.
struct UpstreamStubHandler;

#[async_trait]
impl Handler for UpstreamStubHandler {
    async fn handle(
        &self,
        message: &str,
        session_id: &str,
        _progress_sink: Option<Arc<dyn ProgressSink>>,
        _context: &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerError> {
        info!(session_id, "Stub handler invoked");
        // Simulate a slow upstream call
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(serde_json::json!({ "response": format!("echo: {message}") }))
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

fn load_config() -> QueueConfig {
    QueueConfig::new(
        env_usize("VOXBRIDGE_MAX_QUEUE_SIZE", 100),
        env_usize("VOXBRIDGE_NUM_WORKERS", 3),
        env_usize("VOXBRIDGE_PER_USER_LIMIT", 3),
    )
    .with_request_timeout(env_secs("VOXBRIDGE_REQUEST_TIMEOUT_SECS", 300))
    .with_health_log_interval(env_secs("VOXBRIDGE_HEALTH_INTERVAL_SECS", 60))
}

/// Operator decision for a leftover snapshot: replay, discard, or show
/// detail and ask again. Non-interactive environments can preset the
/// decision via VOXBRIDGE_RECOVERY=replay|discard.
async fn run_recovery(recovery: &RecoveryService, summary: SnapshotSummary) {
    let preset = std::env::var("VOXBRIDGE_RECOVERY").ok();

    println!(
        "Found {} unfinished request(s) from a previous run (saved {}s ago):",
        summary.count(),
        summary.age_secs
    );
    for line in summary.compact_lines() {
        println!("  {line}");
    }

    let mut reader = BufReader::new(stdin()).lines();
    loop {
        let choice = match preset.as_deref() {
            Some(preset) => preset.to_string(),
            None => {
                println!("[r]eplay / [d]iscard / [s]how detail?");
                match reader.next_line().await {
                    Ok(Some(line)) => line.trim().to_lowercase(),
                    _ => {
                        warn!("No operator input, discarding snapshot");
                        "discard".to_string()
                    }
                }
            }
        };

        match choice.as_str() {
            "r" | "replay" => {
                let report = recovery.replay(&summary.items, None).await;
                info!(
                    processed = report.processed,
                    errors = report.errors,
                    "Recovery finished"
                );
                return;
            }
            "d" | "discard" => {
                recovery.discard().await;
                return;
            }
            "s" | "show" => {
                println!("{}", summary.detail_json());
            }
            other => {
                println!("Unrecognized choice: {other}");
                if preset.is_some() {
                    // A bad preset must not loop forever
                    recovery.discard().await;
                    return;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for development)
    let log_format = std::env::var("VOXBRIDGE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("voxbridge=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Voxbridge queue daemon v{} starting...", VERSION);

    // 2. Load configuration
    let persist_path = std::env::var("VOXBRIDGE_PERSIST_PATH")
        .unwrap_or_else(|_| DEFAULT_PERSIST_PATH.to_string());
    let persist_path = shellexpand::tilde(&persist_path).into_owned();
    let config = load_config();

    // 3. Wire dependencies
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&persist_path));
    let handler: Arc<dyn Handler> = Arc::new(UpstreamStubHandler);

    // 4. Crash recovery runs before the queue admits anything
    let recovery = RecoveryService::new(Arc::clone(&store), Arc::clone(&handler));
    if let Some(summary) = recovery.inspect().await {
        run_recovery(&recovery, summary).await;
    }

    // 5. Start the queue
    let queue = Arc::new(RequestQueue::new(config, handler, store));
    queue.start().await?;

    info!(persist_path = %persist_path, "Queue ready, waiting for shutdown signal");

    // 6. Wait for SIGINT or SIGTERM
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }

    // 7. Graceful shutdown: persists in-flight work, drains workers
    queue.shutdown().await?;

    info!("Shutdown complete.");
    Ok(())
}
