use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::heartbeat::HeartbeatEngine;

/// Graceful shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long background tasks get to observe cancellation.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the node's background tasks and tears them down in order.
pub struct GracefulShutdown {
    heartbeat: Arc<HeartbeatEngine>,
    config: ShutdownConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl GracefulShutdown {
    pub fn new(heartbeat: Arc<HeartbeatEngine>, config: ShutdownConfig) -> Self {
        Self {
            heartbeat,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token every background loop checks between iterations.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a tracked background task.
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks.lock().await.push((name, handle));
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Cancel all tasks, wait for them, then leave the cluster.
    pub async fn shutdown(&self) {
        tracing::info!("Starting graceful shutdown");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Err(e) = self.heartbeat.unregister().await {
            tracing::warn!("Failed to unregister from cluster: {}", e);
        }

        tracing::info!("Graceful shutdown complete");
    }
}
