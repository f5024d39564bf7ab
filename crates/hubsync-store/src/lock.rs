//! Per-key async mutex with a bounded wait.
//!
//! Every write for a fid runs under that fid's slot; different fids proceed
//! concurrently. Waiters give up after the configured timeout, and a key with
//! too many waiters refuses new ones. Both failures surface as
//! [`HubError::StorageFailure`]. Slots are dropped once nobody holds or awaits
//! them.

use hubsync_core::HubError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Default wait before a merge gives up on the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on holders plus waiters of one key.
pub const DEFAULT_MAX_PENDING: usize = 1_000;

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

struct Inner<K> {
    slots: Mutex<HashMap<K, Slot>>,
    timeout: Duration,
    max_pending: usize,
}

impl<K: Eq + Hash> Inner<K> {
    fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(key);
            }
        }
    }
}

/// Async mutex keyed by `K`.
pub struct KeyedMutex<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for KeyedMutex<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for KeyedMutex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("timeout", &self.inner.timeout)
            .field("max_pending", &self.inner.max_pending)
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_PENDING)
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> KeyedMutex<K> {
    /// Create a mutex with the given wait timeout and per-key pending cap.
    #[must_use]
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                timeout,
                max_pending,
            }),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage failure on timeout or when the key has too many waiters.
    pub async fn acquire(&self, key: K) -> Result<KeyedGuard<K>, HubError> {
        let lock = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                users: 0,
            });
            if slot.users >= self.inner.max_pending {
                tracing::warn!(?key, pending = slot.users, "Too many pending writers");
                return Err(HubError::storage("too many pending merges"));
            }
            slot.users += 1;
            Arc::clone(&slot.lock)
        };

        // Registered before waiting so a timeout or a dropped future still releases.
        let ticket = Ticket {
            key,
            inner: Arc::clone(&self.inner),
        };

        match tokio::time::timeout(self.inner.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(KeyedGuard {
                _guard: guard,
                ticket,
            }),
            Err(_) => {
                tracing::warn!(key = ?ticket.key, "Lock wait timed out");
                Err(HubError::storage("merge lock timed out"))
            }
        }
    }

    /// Keys with a holder or waiter.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.inner.slots.lock().len()
    }
}

struct Ticket<K: Eq + Hash> {
    key: K,
    inner: Arc<Inner<K>>,
}

impl<K: Eq + Hash> Drop for Ticket<K> {
    fn drop(&mut self) {
        self.inner.release(&self.key);
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyedGuard<K: Eq + Hash> {
    _guard: OwnedMutexGuard<()>,
    ticket: Ticket<K>,
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for KeyedGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", &self.ticket.key)
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash> KeyedGuard<K> {
    /// Key held by this guard.
    pub fn key(&self) -> &K {
        &self.ticket.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let mutex: KeyedMutex<u64> = KeyedMutex::new(Duration::from_millis(50), 10);
        let first = mutex.acquire(1).await.unwrap();
        assert_eq!(*first.key(), 1);
        assert_eq!(format!("{first:?}"), "KeyedGuard { key: 1, .. }");

        let err = mutex.acquire(1).await.unwrap_err();
        assert_eq!(err.code(), "unavailable.storage_failure");

        drop(first);
        tokio_test::assert_ok!(mutex.acquire(1).await);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let mutex: KeyedMutex<u64> = KeyedMutex::new(Duration::from_millis(50), 10);
        let _a = mutex.acquire(1).await.unwrap();
        tokio_test::assert_ok!(mutex.acquire(2).await);
    }

    #[tokio::test]
    async fn pending_cap_rejects_extra_waiters() {
        let mutex: KeyedMutex<u64> = KeyedMutex::new(Duration::from_secs(5), 1);
        let _held = mutex.acquire(9).await.unwrap();
        let err = mutex.acquire(9).await.unwrap_err();
        assert_eq!(err, HubError::storage("too many pending merges"));
    }

    #[tokio::test]
    async fn slots_are_cleaned_up() {
        let mutex: KeyedMutex<u64> = KeyedMutex::default();
        {
            let _a = mutex.acquire(1).await.unwrap();
            let _b = mutex.acquire(2).await.unwrap();
            assert_eq!(mutex.active_keys(), 2);
        }
        assert_eq!(mutex.active_keys(), 0);

        let short: KeyedMutex<u64> = KeyedMutex::new(Duration::from_millis(10), 10);
        let held = short.acquire(3).await.unwrap();
        assert!(short.acquire(3).await.is_err());
        drop(held);
        assert_eq!(short.active_keys(), 0);
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let mutex: KeyedMutex<u64> = KeyedMutex::new(Duration::from_secs(5), 10);
        let held = mutex.acquire(4).await.unwrap();
        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.acquire(4).await.map(|guard| *guard.key()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), 4);
    }
}
