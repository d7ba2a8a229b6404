//! Lock helpers that recover from poisoning instead of panicking.
//!
//! The guarded state (rollout snapshots, session registries, in-memory
//! stores) stays internally consistent across a panicking writer, so the
//! last written value is served with a warning.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, op, "rwlock.write"))
}

pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, op, "mutex.lock"))
}

fn recover<G>(poisoned: PoisonError<G>, op: &'static str, lock_kind: &'static str) -> G {
    warn!(
        target = "placecache::util::lock",
        op,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
    );
    poisoned.into_inner()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Arc::new(Mutex::new(7));
        let cloned = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().expect("first lock");
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*mutex_lock(&lock, "test"), 7);
    }

    #[test]
    fn rwlock_helpers_read_and_write() {
        let lock = RwLock::new(String::from("a"));
        rw_write(&lock, "test").push('b');
        assert_eq!(rw_read(&lock, "test").as_str(), "ab");
    }
}
