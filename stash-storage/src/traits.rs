//! Collaborator traits consumed by the persistence orchestrator.
//!
//! Each trait abstracts one leaf of the system: the durable blob medium, the
//! non-authoritative cache, and the per-scope byte ledger. Implementations
//! must be thread-safe and support concurrent access.

use std::time::Duration;

use async_trait::async_trait;
use stash_core::{QuotaRecord, StashResult, StorageScope};

/// Durable key/value storage keyed by (scope, key).
///
/// A single `save` or `delete` on one key must not be torn. No cross-key
/// transactionality is expected.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under (scope, key), replacing any existing blob.
    async fn save(&self, scope: &StorageScope, key: &str, data: &[u8]) -> StashResult<()>;

    /// Read a blob, or `None` if the key holds nothing.
    async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Option<Vec<u8>>>;

    /// Remove a blob. Removing a missing key succeeds.
    async fn delete(&self, scope: &StorageScope, key: &str) -> StashResult<()>;

    /// Size in bytes of a stored blob, or `None` if the key holds nothing.
    async fn size_of(&self, scope: &StorageScope, key: &str) -> StashResult<Option<u64>>;

    /// Every key stored under a scope.
    async fn list_keys(&self, scope: &StorageScope) -> StashResult<Vec<String>>;
}

/// String-keyed cache with TTL expiry.
///
/// Never authoritative: an entry may vanish at any time. A missing or
/// expired entry is `Ok(None)`; `Err` is reserved for backend failures.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StashResult<Option<String>>;

    /// Store `value`, expiring `ttl` after this call.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StashResult<()>;

    /// Remove an entry. Removing a missing entry succeeds.
    async fn del(&self, key: &str) -> StashResult<()>;

    /// Remove every entry whose key starts with `prefix`, returning the count.
    async fn invalidate_prefix(&self, prefix: &str) -> StashResult<u64>;

    async fn stats(&self) -> StashResult<CacheStats>;
}

/// Durable per-scope byte counter.
///
/// `increment_if_within_cap` must be a single atomic check-and-commit: two
/// concurrent callers may never both pass the cap check against the same
/// prior total.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn get(&self, scope: &StorageScope) -> StashResult<Option<QuotaRecord>>;

    /// Current total and whether a record already existed. Creates a zero
    /// record when absent.
    async fn get_or_init(&self, scope: &StorageScope) -> StashResult<(u64, bool)>;

    /// Add `delta` unless the new total would exceed `local_cap` or
    /// `global_cap`, in which case fail with `QuotaExceeded` and leave the
    /// counter unchanged. Creates the record on first use.
    async fn increment_if_within_cap(
        &self,
        scope: &StorageScope,
        delta: u64,
        local_cap: u64,
        global_cap: u64,
    ) -> StashResult<QuotaRecord>;

    /// Subtract `delta`, flooring at zero. Returns the new total.
    async fn decrement(&self, scope: &StorageScope, delta: u64) -> StashResult<u64>;

    /// Overwrite the total. Only reconciliation should call this.
    async fn set(&self, scope: &StorageScope, allocated_bytes: u64) -> StashResult<QuotaRecord>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries dropped because their TTL passed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
