//! Ownership of background batch tasks

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Tracks spawned background work and the process-wide shutdown signal
///
/// Cloning yields another handle to the same tracker and token.
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TaskSupervisor {
    /// Create a supervisor with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, running = self.tracker.len() + 1, "spawning background task");
        self.tracker.spawn(async move {
            future.await;
            debug!(task = name, "background task finished");
        });
    }

    /// Token cancelled when shutdown begins
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of tracked tasks still running
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Signal shutdown and wait up to `grace` for tracked tasks
    ///
    /// Returns `true` when every task finished in time. Tasks still running
    /// after the grace period are left to die with the runtime.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();

        let running = self.tracker.len();
        if running > 0 {
            info!(running, grace_secs = grace.as_secs(), "waiting for background tasks");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(running = self.tracker.len(), "background tasks still running after grace period");
                false
            }
        }
    }
}
