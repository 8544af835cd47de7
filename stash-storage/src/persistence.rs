//! Quota-enforcing, cache-aside persistence orchestrator.
//!
//! [`Persistence`] composes a [`BlobStore`], a [`CacheStore`] and a
//! [`QuotaLedger`] into the three caller-facing operations:
//!
//! - **save**: validate, write the blob, charge the ledger, invalidate the
//!   cache. A rejected charge restores the prior blob (or removes the new one)
//!   so a failed save leaves nothing behind.
//! - **load**: serve from the cache when possible; otherwise read the blob and
//!   populate the cache.
//! - **delete**: invalidate the cache, delete the blob, release its bytes.
//!
//! The cache is never consulted for accounting. Every property of the
//! orchestrator holds with a cache that always misses.
//!
//! # Locking
//!
//! Save, delete and the miss path of load hold a per-(scope, key) lock.
//! Save and delete additionally hold their scope's gate in shared mode;
//! [`Persistence::reconcile`] takes the gate exclusively so it sees a stable
//! set of blobs.

use std::future::Future;
use std::sync::Arc;

use stash_core::{
    validate_key, OverwriteAccounting, PersistenceConfig, StashError, StashResult, StorageError,
    StorageScope,
};

use crate::cache::ScopedCacheKey;
use crate::locks::KeyedLocks;
use crate::traits::{BlobStore, CacheStats, CacheStore, QuotaLedger};

/// Outcome of [`Persistence::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scope: StorageScope,
    /// Ledger total before reconciliation.
    pub previous: u64,
    /// Sum of blob sizes found under the scope, now stored in the ledger.
    pub actual: u64,
    pub blob_count: usize,
}

impl ReconcileReport {
    /// Whether the ledger had drifted from the stored blobs.
    pub fn corrected(&self) -> bool {
        self.previous != self.actual
    }
}

/// Persistence orchestrator over pluggable stores.
///
/// Cloning is cheap and clones share stores, locks and configuration.
pub struct Persistence<B, C, L> {
    inner: Arc<Inner<B, C, L>>,
}

impl<B, C, L> Clone for Persistence<B, C, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B, C, L> {
    blobs: Arc<B>,
    cache: Arc<C>,
    ledger: Arc<L>,
    config: PersistenceConfig,
    key_locks: KeyedLocks<(StorageScope, String)>,
    scope_gates: KeyedLocks<StorageScope>,
}

impl<B, C, L> Persistence<B, C, L>
where
    B: BlobStore + 'static,
    C: CacheStore + 'static,
    L: QuotaLedger + 'static,
{
    /// Build an orchestrator. Fails if `config` does not validate.
    pub fn new(
        blobs: Arc<B>,
        cache: Arc<C>,
        ledger: Arc<L>,
        config: PersistenceConfig,
    ) -> StashResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                blobs,
                cache,
                ledger,
                config,
                key_locks: KeyedLocks::new(),
                scope_gates: KeyedLocks::new(),
            }),
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.inner.config
    }

    /// Store `data` under (scope, key), charging its size against the
    /// scope's quota.
    ///
    /// `max_size` is the caller's cap for the scope; `None` uses the
    /// configured default. The process-wide ceiling always applies too.
    ///
    /// Once validation passes the save runs on its own task, so dropping
    /// the returned future does not interrupt it between the blob write
    /// and the ledger update.
    pub async fn save(
        &self,
        scope: &StorageScope,
        max_size: Option<u64>,
        key: &str,
        data: &[u8],
    ) -> StashResult<()> {
        validate_key(key, self.inner.config.max_key_len)?;
        let cap = self.inner.config.effective_cap(max_size);

        let inner = Arc::clone(&self.inner);
        let scope = scope.clone();
        let key = key.to_string();
        let data = data.to_vec();
        tokio::spawn(async move { inner.save_detached(&scope, cap, &key, &data).await })
            .await
            .map_err(|e| StorageError::TaskFailed {
                reason: e.to_string(),
            })?
    }

    /// Read the blob under (scope, key), from the cache when possible.
    ///
    /// Fails with `NotFound` when no blob exists.
    pub async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Vec<u8>> {
        validate_key(key, self.inner.config.max_key_len)?;
        self.inner.load(scope, key).await
    }

    /// Remove the blob under (scope, key) and release its bytes.
    ///
    /// Deleting a key that holds nothing succeeds. Like [`save`](Self::save),
    /// the work runs on its own task once validation passes.
    pub async fn delete(&self, scope: &StorageScope, key: &str) -> StashResult<()> {
        validate_key(key, self.inner.config.max_key_len)?;

        let inner = Arc::clone(&self.inner);
        let scope = scope.clone();
        let key = key.to_string();
        tokio::spawn(async move { inner.delete_detached(&scope, &key).await })
            .await
            .map_err(|e| StorageError::TaskFailed {
                reason: e.to_string(),
            })?
    }

    /// Bytes currently charged to `scope`. Zero when nothing was ever saved.
    pub async fn usage(&self, scope: &StorageScope) -> StashResult<u64> {
        let record = self
            .inner
            .bounded("ledger.get", self.inner.ledger.get(scope))
            .await?;
        Ok(record.map(|r| r.allocated_bytes).unwrap_or(0))
    }

    /// Recompute the scope's total from the blobs it actually holds and
    /// store it in the ledger.
    pub async fn reconcile(&self, scope: &StorageScope) -> StashResult<ReconcileReport> {
        self.inner.reconcile(scope).await
    }

    pub async fn cache_stats(&self) -> StashResult<CacheStats> {
        self.inner
            .bounded("cache.stats", self.inner.cache.stats())
            .await
    }
}

impl<B, C, L> Inner<B, C, L>
where
    B: BlobStore,
    C: CacheStore,
    L: QuotaLedger,
{
    /// Run a leaf call under the configured operation timeout.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> StashResult<T>
    where
        F: Future<Output = StashResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation: operation.to_string(),
            }
            .into()),
        }
    }

    async fn save_detached(
        &self,
        scope: &StorageScope,
        cap: u64,
        key: &str,
        data: &[u8],
    ) -> StashResult<()> {
        let _gate = self.scope_gates.read(scope.clone()).await;
        let _lock = self.key_locks.write((scope.clone(), key.to_string())).await;

        let prior = self
            .bounded("blob.load", self.blobs.load(scope, key))
            .await?;
        self.bounded("blob.save", self.blobs.save(scope, key, data))
            .await?;

        let prior_len = prior.as_ref().map(|p| p.len() as u64);
        if let Err(e) = self.charge(scope, cap, prior_len, data.len() as u64).await {
            if is_timeout(&e) {
                // The ledger may have applied the charge before the deadline.
                tracing::warn!(
                    tenant = %scope.tenant_id(),
                    plugin = %scope.plugin_id(),
                    key,
                    error = %e,
                    "Ledger charge timed out with unknown outcome, rolling back blob; reconcile the scope"
                );
            } else {
                tracing::debug!(
                    tenant = %scope.tenant_id(),
                    plugin = %scope.plugin_id(),
                    key,
                    error = %e,
                    "Ledger rejected save, rolling back blob"
                );
            }
            self.compensate(scope, key, prior.as_deref()).await;
            return Err(e);
        }

        let cache_key = ScopedCacheKey::new(scope, key).render();
        if let Err(e) = self.bounded("cache.del", self.cache.del(&cache_key)).await {
            tracing::warn!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                key,
                error = %e,
                "Blob saved but cache invalidation failed"
            );
            return Err(e);
        }

        tracing::debug!(
            tenant = %scope.tenant_id(),
            plugin = %scope.plugin_id(),
            key,
            bytes = data.len(),
            "Saved blob"
        );
        Ok(())
    }

    /// Charge the ledger for writing `new` bytes over `prior` bytes.
    async fn charge(
        &self,
        scope: &StorageScope,
        cap: u64,
        prior: Option<u64>,
        new: u64,
    ) -> StashResult<()> {
        let global = self.config.max_storage_bytes;
        let delta = match self.config.overwrite_accounting {
            OverwriteAccounting::ChargeFullSize => new,
            OverwriteAccounting::NetDelta => {
                let prior = prior.unwrap_or(0);
                if new < prior {
                    self.bounded("ledger.decrement", self.ledger.decrement(scope, prior - new))
                        .await?;
                    return Ok(());
                }
                new - prior
            }
        };

        // A zero delta still runs so the first save creates the record.
        self.bounded(
            "ledger.increment",
            self.ledger.increment_if_within_cap(scope, delta, cap, global),
        )
        .await?;
        Ok(())
    }

    /// Undo a blob write whose charge failed.
    async fn compensate(&self, scope: &StorageScope, key: &str, prior: Option<&[u8]>) {
        let result = match prior {
            Some(bytes) => {
                self.bounded("blob.save", self.blobs.save(scope, key, bytes))
                    .await
            }
            None => {
                self.bounded("blob.delete", self.blobs.delete(scope, key))
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                key,
                error = %e,
                "Failed to roll back blob after rejected charge; stored bytes are unaccounted"
            );
        }
    }

    async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Vec<u8>> {
        let cache_key = ScopedCacheKey::new(scope, key).render();
        if let Some(data) = self.cached(scope, key, &cache_key).await? {
            return Ok(data);
        }

        let _lock = self.key_locks.write((scope.clone(), key.to_string())).await;
        let data = self
            .bounded("blob.load", self.blobs.load(scope, key))
            .await?
            .ok_or_else(|| StorageError::NotFound {
                scope: scope.to_string(),
                key: key.to_string(),
            })?;

        let fill = self.cache.set(&cache_key, hex::encode(&data), self.config.cache_ttl);
        if let Err(e) = self.bounded("cache.set", fill).await {
            tracing::warn!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                key,
                error = %e,
                "Failed to populate cache after load"
            );
        }

        tracing::debug!(
            tenant = %scope.tenant_id(),
            plugin = %scope.plugin_id(),
            key,
            "Cache miss, loaded blob from store"
        );
        Ok(data)
    }

    /// Cached bytes for `cache_key`, or `None` on a miss.
    ///
    /// An entry that does not decode is dropped and reported as a miss.
    async fn cached(
        &self,
        scope: &StorageScope,
        key: &str,
        cache_key: &str,
    ) -> StashResult<Option<Vec<u8>>> {
        let Some(text) = self.bounded("cache.get", self.cache.get(cache_key)).await? else {
            return Ok(None);
        };

        match hex::decode(&text) {
            Ok(data) => {
                tracing::debug!(
                    tenant = %scope.tenant_id(),
                    plugin = %scope.plugin_id(),
                    key,
                    "Cache hit"
                );
                Ok(Some(data))
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %scope.tenant_id(),
                    plugin = %scope.plugin_id(),
                    key,
                    error = %e,
                    "Discarding undecodable cache entry"
                );
                if let Err(e) = self.bounded("cache.del", self.cache.del(cache_key)).await {
                    tracing::warn!(key, error = %e, "Failed to drop undecodable cache entry");
                }
                Ok(None)
            }
        }
    }

    async fn delete_detached(&self, scope: &StorageScope, key: &str) -> StashResult<()> {
        let _gate = self.scope_gates.read(scope.clone()).await;
        let _lock = self.key_locks.write((scope.clone(), key.to_string())).await;

        let cache_key = ScopedCacheKey::new(scope, key).render();
        self.bounded("cache.del", self.cache.del(&cache_key))
            .await?;

        let size = self
            .bounded("blob.size_of", self.blobs.size_of(scope, key))
            .await?;
        if size.is_none() {
            tracing::debug!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                key,
                "Delete of a missing blob, ledger untouched"
            );
        }

        self.bounded("blob.delete", self.blobs.delete(scope, key))
            .await?;

        if let Some(size) = size {
            if let Err(e) = self
                .bounded("ledger.decrement", self.ledger.decrement(scope, size))
                .await
            {
                if is_timeout(&e) {
                    tracing::warn!(
                        tenant = %scope.tenant_id(),
                        plugin = %scope.plugin_id(),
                        key,
                        bytes = size,
                        error = %e,
                        "Blob deleted but ledger release timed out with unknown outcome; reconcile the scope"
                    );
                }
                return Err(e);
            }
            tracing::debug!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                key,
                bytes = size,
                "Deleted blob"
            );
        }
        Ok(())
    }

    async fn reconcile(&self, scope: &StorageScope) -> StashResult<ReconcileReport> {
        let _gate = self.scope_gates.write(scope.clone()).await;

        let keys = self
            .bounded("blob.list_keys", self.blobs.list_keys(scope))
            .await?;
        let mut actual: u64 = 0;
        for key in &keys {
            if let Some(size) = self
                .bounded("blob.size_of", self.blobs.size_of(scope, key))
                .await?
            {
                actual = actual.saturating_add(size);
            }
        }

        let previous = self
            .bounded("ledger.get", self.ledger.get(scope))
            .await?
            .map(|r| r.allocated_bytes);

        let report = ReconcileReport {
            scope: scope.clone(),
            previous: previous.unwrap_or(0),
            actual,
            blob_count: keys.len(),
        };

        if previous != Some(actual) && !(previous.is_none() && actual == 0) {
            self.bounded("ledger.set", self.ledger.set(scope, actual))
                .await?;
            tracing::info!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                previous = report.previous,
                actual,
                blobs = report.blob_count,
                "Reconciled quota ledger"
            );
        }
        Ok(report)
    }
}

fn is_timeout(err: &StashError) -> bool {
    matches!(err, StashError::Storage(StorageError::Timeout { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::cache::InMemoryCacheStore;
    use crate::ledger::InMemoryQuotaLedger;
    use stash_core::{ErrorKind, QuotaError, QuotaRecord, StashError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type TestPersistence = Persistence<InMemoryBlobStore, InMemoryCacheStore, InMemoryQuotaLedger>;

    struct Harness {
        persistence: TestPersistence,
        blobs: Arc<InMemoryBlobStore>,
        cache: Arc<InMemoryCacheStore>,
        ledger: Arc<InMemoryQuotaLedger>,
    }

    fn harness(config: PersistenceConfig) -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let persistence = Persistence::new(
            Arc::clone(&blobs),
            Arc::clone(&cache),
            Arc::clone(&ledger),
            config,
        )
        .unwrap();
        Harness {
            persistence,
            blobs,
            cache,
            ledger,
        }
    }

    fn scope() -> StorageScope {
        StorageScope::parse("t1", "p1").unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = PersistenceConfig::new().with_cache_ttl(Duration::ZERO);
        let result = Persistence::new(
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryQuotaLedger::new()),
            config,
        );
        assert!(matches!(result, Err(StashError::Config(_))));
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let h = harness(PersistenceConfig::default());
        h.persistence
            .save(&scope(), Some(100), "state", b"hello")
            .await
            .unwrap();
        assert_eq!(h.persistence.load(&scope(), "state").await.unwrap(), b"hello");
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalid_key_has_no_side_effects() {
        let h = harness(PersistenceConfig::default());
        let long_key = "k".repeat(65);
        let err = h
            .persistence
            .save(&scope(), None, &long_key, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyTooLong);

        assert_eq!(h.blobs.blob_count(), 0);
        assert!(h.ledger.get(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_key_round_trips() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "", b"root").await.unwrap();
        assert_eq!(h.persistence.load(&scope(), "").await.unwrap(), b"root");
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 4);

        h.persistence.delete(&scope(), "").await.unwrap();
        assert!(h.persistence.load(&scope(), "").await.unwrap_err().is_not_found());
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_save_removes_new_blob() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), Some(100), "a", &[0; 60]).await.unwrap();

        let err = h
            .persistence
            .save(&scope(), Some(100), "b", &[0; 50])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StashError::Quota(QuotaError::QuotaExceeded { requested: 50, allocated: 60, limit: 100, .. })
        ));
        assert!(h.blobs.load(&scope(), "b").await.unwrap().is_none());
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_rejected_overwrite_restores_prior_blob() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), Some(10), "k", b"small").await.unwrap();

        let err = h
            .persistence
            .save(&scope(), Some(10), "k", b"far too large")
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(h.persistence.load(&scope(), "k").await.unwrap(), b"small");
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_global_ceiling_applies() {
        let h = harness(PersistenceConfig::new().with_max_storage_bytes(8));
        let err = h
            .persistence
            .save(&scope(), Some(1000), "k", &[1; 9])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StashError::Quota(QuotaError::QuotaExceeded { limit: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_net_delta_overwrite() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", &[0; 40]).await.unwrap();
        h.persistence.save(&scope(), None, "k", &[0; 10]).await.unwrap();
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 10);
        h.persistence.save(&scope(), None, "k", &[0; 25]).await.unwrap();
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_charge_full_size_overwrite() {
        let h = harness(
            PersistenceConfig::new().with_overwrite_accounting(OverwriteAccounting::ChargeFullSize),
        );
        h.persistence.save(&scope(), None, "k", &[0; 40]).await.unwrap();
        h.persistence.save(&scope(), None, "k", &[0; 10]).await.unwrap();
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_empty_blob_creates_record() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "empty", b"").await.unwrap();
        let record = h.ledger.get(&scope()).await.unwrap().unwrap();
        assert_eq!(record.allocated_bytes, 0);
        assert_eq!(h.persistence.load(&scope(), "empty").await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_load_fills_cache_and_save_invalidates() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", b"one").await.unwrap();
        assert!(h.cache.is_empty());

        h.persistence.load(&scope(), "k").await.unwrap();
        let cache_key = ScopedCacheKey::new(&scope(), "k").render();
        assert_eq!(
            h.cache.get(&cache_key).await.unwrap().as_deref(),
            Some(hex::encode(b"one").as_str())
        );

        h.persistence.save(&scope(), None, "k", b"two").await.unwrap();
        assert!(h.cache.get(&cache_key).await.unwrap().is_none());
        assert_eq!(h.persistence.load(&scope(), "k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_undecodable_cache_entry_is_a_miss() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", b"real").await.unwrap();

        let cache_key = ScopedCacheKey::new(&scope(), "k").render();
        h.cache
            .set(&cache_key, "not hex!".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(h.persistence.load(&scope(), "k").await.unwrap(), b"real");
        assert_eq!(
            h.cache.get(&cache_key).await.unwrap().as_deref(),
            Some(hex::encode(b"real").as_str())
        );
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let h = harness(PersistenceConfig::default());
        let err = h.persistence.load(&scope(), "nothing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_releases_bytes() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", &[7; 30]).await.unwrap();
        h.persistence.load(&scope(), "k").await.unwrap();

        h.persistence.delete(&scope(), "k").await.unwrap();
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 0);
        assert!(h.cache.is_empty());
        assert!(h.persistence.load(&scope(), "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", &[7; 30]).await.unwrap();
        h.persistence.delete(&scope(), "other").await.unwrap();
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_reconcile_corrects_drift() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "a", &[0; 10]).await.unwrap();
        h.persistence.save(&scope(), None, "b", &[0; 5]).await.unwrap();
        h.ledger.set(&scope(), 99).await.unwrap();

        let report = h.persistence.reconcile(&scope()).await.unwrap();
        assert_eq!(report.previous, 99);
        assert_eq!(report.actual, 15);
        assert_eq!(report.blob_count, 2);
        assert!(report.corrected());
        assert_eq!(h.persistence.usage(&scope()).await.unwrap(), 15);

        let again = h.persistence.reconcile(&scope()).await.unwrap();
        assert!(!again.corrected());
    }

    #[tokio::test]
    async fn test_reconcile_empty_scope_creates_no_record() {
        let h = harness(PersistenceConfig::default());
        let report = h.persistence.reconcile(&scope()).await.unwrap();
        assert_eq!(report.actual, 0);
        assert!(h.ledger.get(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let h = harness(PersistenceConfig::default());
        let other = StorageScope::parse("t2", "p1").unwrap();
        h.persistence.save(&scope(), None, "k", b"mine").await.unwrap();

        assert!(h.persistence.load(&other, "k").await.unwrap_err().is_not_found());
        assert_eq!(h.persistence.usage(&other).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_stats_reflect_hits() {
        let h = harness(PersistenceConfig::default());
        h.persistence.save(&scope(), None, "k", b"v").await.unwrap();
        h.persistence.load(&scope(), "k").await.unwrap();
        h.persistence.load(&scope(), "k").await.unwrap();

        let stats = h.persistence.cache_stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    /// Ledger that applies each change, then stalls while `stalling` is set.
    #[derive(Default)]
    struct StallingLedger {
        inner: InMemoryQuotaLedger,
        stalling: AtomicBool,
    }

    impl StallingLedger {
        async fn stall(&self) {
            if self.stalling.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
    }

    #[async_trait::async_trait]
    impl QuotaLedger for StallingLedger {
        async fn get(&self, scope: &StorageScope) -> StashResult<Option<QuotaRecord>> {
            self.inner.get(scope).await
        }

        async fn get_or_init(&self, scope: &StorageScope) -> StashResult<(u64, bool)> {
            self.inner.get_or_init(scope).await
        }

        async fn increment_if_within_cap(
            &self,
            scope: &StorageScope,
            delta: u64,
            local_cap: u64,
            global_cap: u64,
        ) -> StashResult<QuotaRecord> {
            let result = self
                .inner
                .increment_if_within_cap(scope, delta, local_cap, global_cap)
                .await;
            self.stall().await;
            result
        }

        async fn decrement(&self, scope: &StorageScope, delta: u64) -> StashResult<u64> {
            let result = self.inner.decrement(scope, delta).await;
            self.stall().await;
            result
        }

        async fn set(&self, scope: &StorageScope, allocated_bytes: u64) -> StashResult<QuotaRecord> {
            self.inner.set(scope, allocated_bytes).await
        }
    }

    fn stalling_harness() -> (
        Persistence<InMemoryBlobStore, InMemoryCacheStore, StallingLedger>,
        Arc<InMemoryBlobStore>,
        Arc<StallingLedger>,
    ) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let ledger = Arc::new(StallingLedger::default());
        let persistence = Persistence::new(
            Arc::clone(&blobs),
            Arc::new(InMemoryCacheStore::new()),
            Arc::clone(&ledger),
            PersistenceConfig::new().with_operation_timeout(Duration::from_millis(30)),
        )
        .unwrap();
        (persistence, blobs, ledger)
    }

    #[tokio::test]
    async fn test_ledger_timeout_on_save_rolls_back_and_reconciles() {
        let (persistence, blobs, ledger) = stalling_harness();
        ledger.stalling.store(true, Ordering::SeqCst);

        let err = persistence.save(&scope(), None, "k", &[1; 12]).await.unwrap_err();
        assert_eq!(
            err,
            StashError::Storage(StorageError::Timeout {
                operation: "ledger.increment".to_string()
            })
        );

        // The charge landed before the deadline; the blob was rolled back.
        assert_eq!(blobs.blob_count(), 0);
        assert_eq!(ledger.get(&scope()).await.unwrap().unwrap().allocated_bytes, 12);

        let report = persistence.reconcile(&scope()).await.unwrap();
        assert_eq!(report.previous, 12);
        assert_eq!(report.actual, 0);
        assert_eq!(persistence.usage(&scope()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_timeout_on_overwrite_restores_prior_blob() {
        let (persistence, blobs, ledger) = stalling_harness();
        persistence.save(&scope(), None, "k", &[1; 20]).await.unwrap();
        ledger.stalling.store(true, Ordering::SeqCst);

        // Shrinking releases bytes through a decrement.
        let err = persistence.save(&scope(), None, "k", &[2; 5]).await.unwrap_err();
        assert_eq!(
            err,
            StashError::Storage(StorageError::Timeout {
                operation: "ledger.decrement".to_string()
            })
        );
        assert_eq!(blobs.load(&scope(), "k").await.unwrap(), Some(vec![1; 20]));

        ledger.stalling.store(false, Ordering::SeqCst);
        let report = persistence.reconcile(&scope()).await.unwrap();
        assert_eq!(report.previous, 5);
        assert_eq!(report.actual, 20);
    }

    #[tokio::test]
    async fn test_ledger_timeout_on_delete_is_reported() {
        let (persistence, blobs, ledger) = stalling_harness();
        persistence.save(&scope(), None, "k", &[1; 8]).await.unwrap();
        ledger.stalling.store(true, Ordering::SeqCst);

        let err = persistence.delete(&scope(), "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(blobs.blob_count(), 0);

        ledger.stalling.store(false, Ordering::SeqCst);
        let report = persistence.reconcile(&scope()).await.unwrap();
        assert_eq!(report.actual, 0);
        assert!(!report.corrected());
    }
}
