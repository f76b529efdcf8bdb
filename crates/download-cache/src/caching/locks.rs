use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// A registry of per-key locks.
///
/// A lock for a key is created on first use and shared by everyone asking for the same key.
/// Once the last holder or waiter is gone, the key is removed from the registry again.
#[derive(Debug, Default)]
pub(super) struct KeyLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl KeyLocks {
    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyLockGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_owned()).or_default())
        };

        let guard = mutex.lock_owned().await;
        KeyLockGuard {
            key: key.to_owned(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Takes `key` if nobody else holds or waits for it right now.
    pub fn try_lock(&self, key: &str) -> Option<KeyLockGuard> {
        // Holding the registry lock keeps the current owner from releasing in between, so a
        // failed attempt never leaves an unused entry behind.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let mutex = Arc::clone(locks.entry(key.to_owned()).or_default());

        let guard = mutex.try_lock_owned().ok()?;
        Some(KeyLockGuard {
            key: key.to_owned(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    /// The number of keys that are currently locked or waited on.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one key of [`KeyLocks`], released on drop.
#[derive(Debug)]
pub(super) struct KeyLockGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // New waiters only clone the mutex while holding the registry lock, so the reference
        // count cannot grow between the check and the removal below.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());

        if let Some(mutex) = locks.get(&self.key)
            && Arc::strong_count(mutex) == 1
        {
            locks.remove(&self.key);
        }
    }
}
