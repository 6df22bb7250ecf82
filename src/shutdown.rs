//! Graceful termination of the listener and per-connection tasks.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::SHUTDOWN_GRACE;

pub struct ShutdownManager {
    /// Cancelled once; every server task selects on it.
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Wait for ctrl+c, then shut down.
    pub async fn wait_for_shutdown(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("🛑 Shutdown signal received");
        self.shutdown().await;
    }

    /// Cancel all tasks and wait up to the grace period for them to finish.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();

        let handles: Vec<_> = self.task_handles.drain(..).collect();
        let join_all = async move {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, join_all).await {
            Ok(()) => tracing::info!("✓ All tasks shut down gracefully"),
            Err(_) => tracing::warn!("⏱️  Shutdown timeout: Some tasks did not complete"),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
