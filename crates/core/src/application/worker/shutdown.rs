// Graceful-stop signalling for workers and the health monitor

use tokio::sync::watch;

/// Receiving side of the stop signal. Cloned into every worker task and
/// the health monitor.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested, including when the request
    /// happened before this call.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            // Sender dropped counts as shutdown too
            if self.rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Sending side, held by the queue facade.
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Request shutdown of every task holding a token.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
