use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Every critical section is a single map operation, so the map behind a
// poisoned lock is still consistent. Poisoning is logged and then ignored.

pub(crate) fn rw_read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(op, lock_kind = "rwlock.read", "Recovered from poisoned cache lock");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(op, lock_kind = "rwlock.write", "Recovered from poisoned cache lock");
            poisoned.into_inner()
        }
    }
}
