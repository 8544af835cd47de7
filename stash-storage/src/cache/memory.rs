//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::{CacheError, StashResult};

use crate::traits::{CacheStats, CacheStore};

#[derive(Debug, Clone)]
struct CacheSlot {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory [`CacheStore`] with lazy expiry.
///
/// Expired entries are dropped when read or by [`InMemoryCacheStore::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheSlot>>,
    stats: RwLock<CacheStats>,
}

fn poisoned() -> CacheError {
    CacheError::Backend {
        reason: "cache lock poisoned".to_string(),
    }
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> StashResult<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, slot| slot.expires_at > now);
        let removed = (before - entries.len()) as u64;
        drop(entries);

        if removed > 0 {
            let mut stats = self.stats.write().map_err(|_| poisoned())?;
            stats.expirations += removed;
        }
        Ok(removed)
    }

    /// Number of live and not-yet-purged entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> StashResult<Option<String>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(key) {
                Some(slot) if slot.expires_at > now => {
                    let value = slot.value.clone();
                    drop(entries);
                    self.record(|s| s.hits += 1);
                    return Ok(Some(value));
                }
                Some(_) => {}
                None => {
                    drop(entries);
                    self.record(|s| s.misses += 1);
                    return Ok(None);
                }
            }
        }

        // Expired: remove unless a writer refreshed it meanwhile.
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let expired = matches!(entries.get(key), Some(slot) if slot.expires_at <= now);
        if expired {
            entries.remove(key);
        }
        drop(entries);
        self.record(|s| {
            s.misses += 1;
            if expired {
                s.expirations += 1;
            }
        });
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StashResult<()> {
        let slot = CacheSlot {
            value,
            expires_at: expiry_after(ttl),
        };
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), slot);
        Ok(())
    }

    async fn del(&self, key: &str) -> StashResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> StashResult<u64> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> StashResult<CacheStats> {
        let entry_count = self.entries.read().map_err(|_| poisoned())?.len() as u64;
        let mut stats = self.stats.read().map_err(|_| poisoned())?.clone();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}
