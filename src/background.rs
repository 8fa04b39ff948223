//! Tracked background tasks.
//!
//! Work spawned here survives the request that started it but not the
//! process: shutdown waits for every tracked task before exiting, so
//! end-of-stream persistence writes are not lost to a fast restart.

use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a task that shutdown will wait on.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(future);
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Stop accepting new tasks and wait for in-flight ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!("background tasks drained");
    }
}
