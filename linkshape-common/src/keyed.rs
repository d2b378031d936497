//! Per-key async locking.

use std::{collections::HashMap, fmt, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots<K> = Arc<parking_lot::Mutex<HashMap<K, Arc<Mutex<()>>>>>;

/// A set of async mutexes, one per key.
///
/// Tasks locking different keys never contend with each other. Tasks locking the same key are
/// served in FIFO order, as with [`tokio::sync::Mutex`]. A key's mutex only exists while it is
/// held or waited on, so the set does not grow with the number of distinct keys ever used.
#[derive(Debug)]
pub struct KeyedMutex<K> {
    slots: Slots<K>,
}

impl<K> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self { slots: Arc::new(parking_lot::Mutex::new(HashMap::new())) }
    }
}

/// Guard returned by [`KeyedMutex::lock`]. The key is released when this is dropped.
pub struct KeyedGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots<K>,
}

impl<K: Eq + Hash> KeyedGuard<K> {
    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for KeyedGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        // Release and prune under the map lock, so no task can pick up the slot in between.
        let mut slots = self.slots.lock();
        drop(self.guard.take());

        // The map holds the only remaining reference: nobody is waiting on this key.
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the mutex for `key` is free and acquires it.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        // The sync map lock is never held across an await point.
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();
        let guard = slot.lock_owned().await;

        KeyedGuard { key, guard: Some(guard), slots: Arc::clone(&self.slots) }
    }

    /// Returns `true` if some task currently holds the mutex for `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        self.slots.lock().get(key).is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` if no key is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
