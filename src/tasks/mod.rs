//! Bounded background execution.
//!
//! [`BoundedTaskPool`] caps how many keyed operations run at once and keeps a
//! registry of the ones in flight. [`KeyedRequestRegistry`] sits on top of it
//! for callers that want to `await` a typed result instead of holding a
//! handle.

pub mod pool;
pub mod registry;

pub use pool::{BoundedTaskPool, TaskHandle, TaskOutcome};
pub use registry::KeyedRequestRegistry;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}
