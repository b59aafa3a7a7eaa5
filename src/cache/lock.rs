//! Poison-tolerant lock helpers shared by the cache components.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

// Every critical section leaves the protected maps structurally valid, so a
// poisoned guard is recovered and logged.
fn recover<G>(
    poisoned: PoisonError<G>,
    component: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        component,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned cache lock"
    );
    poisoned.into_inner()
}

/// Acquire a read guard, recovering a poisoned lock.
pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, component, op, "rwlock.read"))
}

/// Acquire a write guard, recovering a poisoned lock.
pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    component: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, component, op, "rwlock.write"))
}

/// Acquire a mutex guard, recovering a poisoned lock.
///
/// `component` and `op` name the caller in the recovery log.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    component: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, component, op, "mutex.lock"))
}
