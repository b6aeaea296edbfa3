use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Locks `lock`, recovering the guard if a previous holder panicked.
///
/// The cluster keeps its slot arena and queue behind plain mutexes that are
/// never held across an await, so a poisoned guard only means a panic
/// happened between two synchronous mutations.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "cluster state may be stale after panic in another thread",
                "Recovered from poisoned cluster lock"
            );
            poisoned.into_inner()
        }
    }
}
