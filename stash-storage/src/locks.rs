//! Keyed async locks.
//!
//! A [`KeyedLocks`] table hands out one `tokio::sync::RwLock` per key on
//! demand and drops the entry again once nobody holds or waits on it, so the
//! table only ever contains keys that are in use.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Slot = Arc<RwLock<()>>;

/// Table of async reader/writer locks keyed by `K`.
#[derive(Debug)]
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    slots: DashMap<K, Slot>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` exclusively.
    ///
    /// Dropping the returned future while it waits still prunes the entry.
    pub async fn write(&self, key: K) -> KeyedGuard<'_, K> {
        // The guard exists before the wait so its Drop runs on cancellation,
        // after the pending acquire (and its slot reference) is gone.
        let mut guard = self.unheld(key);
        let slot = self.slot(&guard.key);
        guard.held = Some(Held::Write(slot.write_owned().await));
        guard
    }

    /// Acquire `key` shared.
    pub async fn read(&self, key: K) -> KeyedGuard<'_, K> {
        let mut guard = self.unheld(key);
        let slot = self.slot(&guard.key);
        guard.held = Some(Held::Read(slot.read_owned().await));
        guard
    }

    /// Keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn unheld(&self, key: K) -> KeyedGuard<'_, K> {
        KeyedGuard {
            locks: self,
            key,
            held: None,
        }
    }

    // The map reference is dropped before returning; it must never be held
    // across an await.
    fn slot(&self, key: &K) -> Slot {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    fn release(&self, key: &K) {
        // Only the table's own reference left: no holder and no waiter.
        self.slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[derive(Debug)]
enum Held {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Guard for one key of a [`KeyedLocks`] table. Releases on drop.
#[derive(Debug)]
pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    locks: &'a KeyedLocks<K>,
    key: K,
    held: Option<Held>,
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Drop the lock guard first so its Arc no longer counts.
        self.held.take();
        self.locks.release(&self.key);
    }
}
