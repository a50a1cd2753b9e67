//! Graceful shutdown on SIGINT/SIGTERM.

use tokio::sync::watch;

/// Trigger side, held by whoever decides the daemon should stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Listening side, held by the orchestrator loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A linked trigger/listener pair.
    pub fn channel() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the handle is dropped.
    pub async fn wait(&mut self) {
        // An error means the sender is gone, which is treated as a stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Listener wired to SIGINT and, on Unix, SIGTERM.
    pub fn from_signals() -> Shutdown {
        let (handle, shutdown) = Shutdown::channel();
        tokio::spawn(async move {
            wait_for_signal().await;
            handle.trigger();
        });
        shutdown
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Ctrl+C received, shutting down");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl+C received, shutting down"),
        _ = term.recv() => tracing::info!("SIGTERM received, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Ctrl+C received, shutting down");
}
