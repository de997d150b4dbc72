use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::{BoundedTaskPool, TaskOutcome};

/// Awaitable front for [`BoundedTaskPool`]: one call, one typed result.
///
/// The result cell behind each request is the handle's oneshot channel, so
/// it is filled exactly once with a value, an error, or a cancellation.
#[derive(Clone)]
pub struct KeyedRequestRegistry {
    pool: BoundedTaskPool,
}

impl KeyedRequestRegistry {
    pub fn new(pool: BoundedTaskPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &BoundedTaskPool {
        &self.pool
    }

    /// Run `work` under `key` and wait for it. Errors are the work's own;
    /// cancellation comes back as [`crate::AppError::Cancelled`].
    pub async fn request<T, F, Fut>(&self, key: impl Into<String>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.request_outcome(key, work).await.into_result()
    }

    /// Like [`KeyedRequestRegistry::request`] but keeps the three-way outcome.
    /// A rejected submission (e.g. an empty key) reads as a failure.
    pub async fn request_outcome<T, F, Fut>(&self, key: impl Into<String>, work: F) -> TaskOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.pool.submit(key, work).await {
            Ok(handle) => handle.join().await,
            Err(err) => TaskOutcome::Failed(err),
        }
    }
}
