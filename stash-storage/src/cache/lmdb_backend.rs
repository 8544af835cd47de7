//! LMDB-backed cache store.
//!
//! Entries survive process restarts but stay non-authoritative: each value is
//! stored with its absolute expiry and dropped once read past it.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, i64 millis little-endian][utf-8 value]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` hits
//! - Write transactions for `set`, `del`, expiry and prefix invalidation
//! - Statistics are kept behind an `RwLock`

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env};
use stash_core::StashResult;

use crate::lmdb::{open_database, open_env, LmdbStoreError};
use crate::traits::{CacheStats, CacheStore};

const CACHE_DB: &str = "cache";

/// LMDB-backed [`CacheStore`].
///
/// # Example
///
/// ```ignore
/// let cache = LmdbCacheStore::open("/var/lib/stash/cache", 64)?;
/// cache.set("persistence:cache:t:p:k", "0a0b".into(), Duration::from_secs(300)).await?;
/// ```
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheStore {
    /// Open a dedicated environment at `path`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let env = open_env(path, max_size_mb)?;
        Self::new(&env)
    }

    /// Open the cache database inside an existing environment.
    pub fn new(env: &Env) -> Result<Self, LmdbStoreError> {
        let db = open_database(env, CACHE_DB)?;
        Ok(Self {
            env: env.clone(),
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn encode(value: &str, expires_at: DateTime<Utc>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + value.len());
        bytes.extend_from_slice(&expires_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<(DateTime<Utc>, String), LmdbStoreError> {
        if bytes.len() < 8 {
            return Err(LmdbStoreError::Deserialization(
                "cache value shorter than its expiry header".into(),
            ));
        }
        let expiry_bytes: [u8; 8] = bytes[0..8]
            .try_into()
            .map_err(|_| LmdbStoreError::Deserialization("Invalid expiry".into()))?;
        let expires_at = DateTime::from_timestamp_millis(i64::from_le_bytes(expiry_bytes))
            .ok_or_else(|| LmdbStoreError::Deserialization("Expiry out of range".into()))?;
        let value = String::from_utf8(bytes[8..].to_vec())
            .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
        Ok((expires_at, value))
    }

    /// Delete `key` if it is still expired at `now`. Returns whether it was removed.
    fn remove_if_expired(&self, key: &[u8], now: DateTime<Utc>) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn()?;
        let expired = match self.db.get(&wtxn, key)? {
            Some(bytes) => match Self::decode(bytes) {
                Ok((expires_at, _)) => expires_at <= now,
                Err(_) => true,
            },
            None => false,
        };
        if expired {
            self.db.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(expired)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> StashResult<Option<String>> {
        let now = Utc::now();
        let found = {
            let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(LmdbStoreError::from)? {
                Some(bytes) => Some(Self::decode(bytes)),
                None => None,
            }
        };

        match found {
            Some(Ok((expires_at, value))) if expires_at > now => {
                self.record(|s| s.hits += 1);
                Ok(Some(value))
            }
            Some(_) => {
                // Expired or unreadable: drop it and report a miss.
                let removed = self.remove_if_expired(key.as_bytes(), now)?;
                self.record(|s| {
                    s.misses += 1;
                    if removed {
                        s.expirations += 1;
                    }
                });
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StashResult<()> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let bytes = Self::encode(&value, expires_at);

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StashResult<()> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> StashResult<u64> {
        let keys: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
            let iter = self
                .db
                .prefix_iter(&rtxn, prefix.as_bytes())
                .map_err(LmdbStoreError::from)?;
            let mut keys = Vec::new();
            for entry in iter {
                let (key, _) = entry.map_err(LmdbStoreError::from)?;
                keys.push(key.to_vec());
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(LmdbStoreError::from)?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(deleted)
    }

    async fn stats(&self) -> StashResult<CacheStats> {
        let entry_count = {
            let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
            self.db.len(&rtxn).map_err(LmdbStoreError::from)?
        };
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}
