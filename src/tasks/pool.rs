use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use log::{debug, info, warn};
use tokio::sync::{oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{AppError, Result};
use crate::utils::lock_unpoisoned;

use super::ensure_concurrency_limit;

/// How a pooled operation ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(AppError),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Completed(value),
            Err(AppError::Cancelled) => TaskOutcome::Cancelled,
            Err(err) => TaskOutcome::Failed(err),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    /// Collapse into a `Result`; cancellation maps to [`AppError::Cancelled`].
    pub fn into_result(self) -> Result<T> {
        match self {
            TaskOutcome::Completed(value) => Ok(value),
            TaskOutcome::Failed(err) => Err(err),
            TaskOutcome::Cancelled => Err(AppError::Cancelled),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Awaitable result of one submitted operation.
pub struct TaskHandle<T> {
    key: String,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Signal this operation's token. Cooperative: the work has to observe it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the outcome. A task torn down with the runtime reads as cancelled.
    pub async fn join(self) -> TaskOutcome<T> {
        self.outcome.await.unwrap_or(TaskOutcome::Cancelled)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

struct TrackedOperation {
    id: u64,
    cancel: CancellationToken,
}

struct PoolInner {
    capacity: usize,
    slots: Arc<Semaphore>,
    running: Mutex<HashMap<String, TrackedOperation>>,
    in_flight: watch::Sender<usize>,
    scope: CancellationToken,
    generation: Mutex<CancellationToken>,
    next_id: AtomicU64,
}

impl PoolInner {
    fn generation_token(&self) -> CancellationToken {
        lock_unpoisoned(&self.generation).child_token()
    }
}

/// Runs keyed async operations with at most `capacity` executing at once.
///
/// Submitting suspends the caller until a slot frees up, which is the only
/// backpressure point. Every operation gets its own cancellation token,
/// derived from the pool's current generation, which in turn is derived from
/// the scope token the pool was built with.
///
/// Keys are for tracking, not deduplication: submitting a key that is still
/// running replaces the registry entry, and the superseded operation keeps
/// running untracked. It can no longer be cancelled by key, only through its
/// handle or [`BoundedTaskPool::cancel_all`].
#[derive(Clone)]
pub struct BoundedTaskPool {
    inner: Arc<PoolInner>,
}

impl BoundedTaskPool {
    pub fn new(capacity: usize, scope: CancellationToken) -> Self {
        let capacity = ensure_concurrency_limit(capacity);
        let (in_flight, _) = watch::channel(0);
        let generation = scope.child_token();

        Self {
            inner: Arc::new(PoolInner {
                capacity,
                slots: Arc::new(Semaphore::new(capacity)),
                running: Mutex::new(HashMap::new()),
                in_flight,
                scope,
                generation: Mutex::new(generation),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &PoolConfig, scope: CancellationToken) -> Self {
        Self::new(config.effective_capacity(), scope)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Schedule `work` under `key`, waiting for a free slot first.
    pub async fn submit<T, F, Fut>(&self, key: impl Into<String>, work: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(AppError::InvalidKey(key));
        }

        let permit = Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| AppError::message("task pool slots are closed"))?;

        let cancel = self.inner.generation_token();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = SlotGuard::track(Arc::clone(&self.inner), key.clone(), id, cancel.clone(), permit);

        let (tx, rx) = oneshot::channel();
        let token = cancel.clone();
        let task_key = key.clone();

        tokio::spawn(async move {
            let outcome = if token.is_cancelled() {
                TaskOutcome::Cancelled
            } else {
                match AssertUnwindSafe(async move { work(token).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => TaskOutcome::from_result(result),
                    Err(panic) => TaskOutcome::Failed(AppError::message(format!(
                        "task `{task_key}` panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                }
            };

            match &outcome {
                TaskOutcome::Failed(err) => warn!("Task `{}` failed: {}", task_key, err),
                other => debug!("Task `{}` {}", task_key, other.label()),
            }

            // Bookkeeping is released before the outcome becomes observable.
            drop(slot);
            let _ = tx.send(outcome);
        });

        Ok(TaskHandle {
            key,
            cancel,
            outcome: rx,
        })
    }

    /// Cancel the tracked operation for `key`. Returns whether one was found.
    pub fn cancel(&self, key: &str) -> bool {
        let token = lock_unpoisoned(&self.inner.running)
            .get(key)
            .map(|op| op.cancel.clone());

        match token {
            Some(token) => {
                info!("Cancelling task `{}`", key);
                token.cancel();
                true
            }
            None => {
                debug!("No running task `{}` to cancel", key);
                false
            }
        }
    }

    /// Signal every operation submitted so far. Later submissions start from a
    /// fresh generation, so the pool stays usable.
    pub fn cancel_all(&self) {
        let previous = {
            let mut generation = lock_unpoisoned(&self.inner.generation);
            std::mem::replace(&mut *generation, self.inner.scope.child_token())
        };
        info!("Cancelling all running tasks ({})", self.running_count());
        previous.cancel();
    }

    /// Snapshot of the registry size; may be stale as soon as it returns.
    pub fn running_count(&self) -> usize {
        lock_unpoisoned(&self.inner.running).len()
    }

    pub fn is_running(&self, key: &str) -> bool {
        lock_unpoisoned(&self.inner.running).contains_key(key)
    }

    pub fn running_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock_unpoisoned(&self.inner.running)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Wait until nothing is in flight, superseded duplicates included.
    /// Submissions racing in during the wait extend it; there is no quiescence.
    pub async fn drain(&self) {
        let mut in_flight = self.inner.in_flight.subscribe();
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }
}

/// Registry entry plus concurrency slot for one operation, released together
/// on drop whichever way the operation ends.
struct SlotGuard {
    pool: Arc<PoolInner>,
    key: String,
    id: u64,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    fn track(
        pool: Arc<PoolInner>,
        key: String,
        id: u64,
        cancel: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let superseded = lock_unpoisoned(&pool.running)
            .insert(key.clone(), TrackedOperation { id, cancel })
            .is_some();
        if superseded {
            debug!("Task `{}` resubmitted while running; tracking the newest", key);
        }
        pool.in_flight.send_modify(|count| *count += 1);

        Self {
            pool,
            key,
            id,
            _permit: permit,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut running = lock_unpoisoned(&self.pool.running);
            if running.get(&self.key).is_some_and(|op| op.id == self.id) {
                running.remove(&self.key);
            }
        }
        self.pool
            .in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
