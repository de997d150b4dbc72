use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bookkeeping behind these mutexes stays consistent across a panic, so a
/// poisoned lock is recovered instead of propagated.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
