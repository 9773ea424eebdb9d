//! Per-extension ownership boundary.
//!
//! Each loaded extension gets one [`IsolationScope`]. Background tasks it
//! spawns and values it parks through the scope are owned by it, and
//! releasing the scope on unload is the single point where all of them
//! are stopped and dropped.

use std::any::Any;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Owned state of one extension instance.
pub struct IsolationScope {
    extension_id: String,
    token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    resources: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for IsolationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationScope")
            .field("extension_id", &self.extension_id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl IsolationScope {
    pub(crate) fn new(extension_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            token: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            resources: Mutex::new(Vec::new()),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Spawn a background task owned by this scope.
    ///
    /// The task is dropped at its next await point once the scope is
    /// released. Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_released() {
            tracing::warn!(
                "Extension '{}' spawned a task after release; ignoring",
                self.extension_id
            );
            return;
        }
        let token = self.token.clone();
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = task => {}
                }
            });
    }

    /// Token cancelled when the scope is released, for tasks that want to
    /// shut down gracefully.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Park a value until the scope is released.
    pub fn retain<T: Any + Send + Sync>(&self, value: T) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(value));
    }

    /// Number of values currently parked.
    pub fn retained(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop every owned task and drop every parked value.
    pub(crate) async fn release(&self) {
        self.token.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        tasks.shutdown().await;
        let resources =
            std::mem::take(&mut *self.resources.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(
            "Released scope of '{}' ({} resources)",
            self.extension_id,
            resources.len()
        );
        drop(resources);
    }
}
