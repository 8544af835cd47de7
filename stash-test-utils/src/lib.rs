//! STASH Test Utilities
//!
//! Shared test infrastructure for the STASH workspace:
//! - Proptest generators for scopes, keys and blobs
//! - Fault-injecting store wrappers
//! - Test fixtures wiring an orchestrator over in-memory stores
//! - Custom assertions for STASH error variants

pub use stash_core::{
    ErrorKind, OverwriteAccounting, PersistenceConfig, PluginId, QuotaError, StashError,
    StashResult, StorageError, StorageScope, TenantId, ValidationError, MAX_KEY_LEN,
};
pub use stash_storage::{
    BlobStore, CacheStats, CacheStore, InMemoryBlobStore, InMemoryCacheStore,
    InMemoryQuotaLedger, Persistence, QuotaLedger,
};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

fn injected(operation: &str) -> StashError {
    StashError::backend(format!("injected {operation} failure"))
}

/// [`BlobStore`] wrapper that can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyBlobStore<B> {
    inner: B,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
    fail_deletes: AtomicBool,
    delay_ms: AtomicU64,
    load_calls: AtomicUsize,
}

impl<B: BlobStore> FlakyBlobStore<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make `load` and `size_of` fail.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Stall every call by `delay` before delegating.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `load` calls that reached this wrapper.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    async fn stall(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl<B: BlobStore> BlobStore for FlakyBlobStore<B> {
    async fn save(&self, scope: &StorageScope, key: &str, data: &[u8]) -> StashResult<()> {
        self.stall().await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(injected("blob save"));
        }
        self.inner.save(scope, key, data).await
    }

    async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Option<Vec<u8>>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(injected("blob load"));
        }
        self.inner.load(scope, key).await
    }

    async fn delete(&self, scope: &StorageScope, key: &str) -> StashResult<()> {
        self.stall().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("blob delete"));
        }
        self.inner.delete(scope, key).await
    }

    async fn size_of(&self, scope: &StorageScope, key: &str) -> StashResult<Option<u64>> {
        self.stall().await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(injected("blob size_of"));
        }
        self.inner.size_of(scope, key).await
    }

    async fn list_keys(&self, scope: &StorageScope) -> StashResult<Vec<String>> {
        self.stall().await;
        self.inner.list_keys(scope).await
    }
}

/// [`CacheStore`] wrapper that can be told to fail individual operations.
#[derive(Debug, Default)]
pub struct FlakyCacheStore<C> {
    inner: C,
    fail_gets: AtomicBool,
    fail_sets: AtomicBool,
    fail_dels: AtomicBool,
    set_calls: AtomicUsize,
}

impl<C: CacheStore> FlakyCacheStore<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            fail_gets: AtomicBool::new(false),
            fail_sets: AtomicBool::new(false),
            fail_dels: AtomicBool::new(false),
            set_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dels(&self, fail: bool) {
        self.fail_dels.store(fail, Ordering::SeqCst);
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: CacheStore> CacheStore for FlakyCacheStore<C> {
    async fn get(&self, key: &str) -> StashResult<Option<String>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(stash_core::CacheError::Backend {
                reason: "injected cache get failure".to_string(),
            }
            .into());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StashResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(stash_core::CacheError::Backend {
                reason: "injected cache set failure".to_string(),
            }
            .into());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> StashResult<()> {
        if self.fail_dels.load(Ordering::SeqCst) {
            return Err(stash_core::CacheError::Backend {
                reason: "injected cache del failure".to_string(),
            }
            .into());
        }
        self.inner.del(key).await
    }

    async fn invalidate_prefix(&self, prefix: &str) -> StashResult<u64> {
        self.inner.invalidate_prefix(prefix).await
    }

    async fn stats(&self) -> StashResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STASH inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid TenantId.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        "[a-z][a-z0-9_-]{0,15}".prop_map(|s| TenantId::new(s).expect("pattern excludes ':'"))
    }

    /// Generate a valid PluginId.
    pub fn arb_plugin_id() -> impl Strategy<Value = PluginId> {
        "[a-z][a-z0-9._-]{0,23}".prop_map(|s| PluginId::new(s).expect("pattern excludes ':'"))
    }

    /// Generate a StorageScope.
    pub fn arb_scope() -> impl Strategy<Value = StorageScope> {
        (arb_tenant_id(), arb_plugin_id()).prop_map(|(t, p)| StorageScope::new(t, p))
    }

    /// Generate a key of at most [`MAX_KEY_LEN`] bytes, possibly empty,
    /// including multi-byte characters.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                proptest::char::range('a', 'z'),
                proptest::char::range('0', '9'),
                Just(':'),
                Just('/'),
                Just('é'),
                Just('日'),
            ],
            0..=MAX_KEY_LEN,
        )
        .prop_map(|chars| {
            let mut key = String::new();
            for c in chars {
                if key.len() + c.len_utf8() > MAX_KEY_LEN {
                    break;
                }
                key.push(c);
            }
            key
        })
    }

    /// Generate a key one or more bytes past the limit.
    pub fn arb_oversized_key() -> impl Strategy<Value = String> {
        prop_oneof![
            (MAX_KEY_LEN + 1..MAX_KEY_LEN * 4).prop_map(|len| "k".repeat(len)),
            (MAX_KEY_LEN / 2 + 1..MAX_KEY_LEN).prop_map(|len| "é".repeat(len)),
        ]
    }

    /// Generate blob bytes of up to `max_len` bytes.
    pub fn arb_blob(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..=max_len)
    }

    /// Generate an OverwriteAccounting variant.
    pub fn arb_overwrite_accounting() -> impl Strategy<Value = OverwriteAccounting> {
        prop_oneof![
            Just(OverwriteAccounting::NetDelta),
            Just(OverwriteAccounting::ChargeFullSize),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built orchestrators and scopes for common scenarios.

    use super::*;
    use std::sync::Arc;

    pub type FlakyPersistence = Persistence<
        FlakyBlobStore<InMemoryBlobStore>,
        FlakyCacheStore<InMemoryCacheStore>,
        InMemoryQuotaLedger,
    >;

    /// Orchestrator over in-memory stores, with handles to each store.
    pub struct Harness {
        pub persistence: FlakyPersistence,
        pub blobs: Arc<FlakyBlobStore<InMemoryBlobStore>>,
        pub cache: Arc<FlakyCacheStore<InMemoryCacheStore>>,
        pub ledger: Arc<InMemoryQuotaLedger>,
    }

    impl Harness {
        pub fn new(config: PersistenceConfig) -> Self {
            let blobs = Arc::new(FlakyBlobStore::new(InMemoryBlobStore::new()));
            let cache = Arc::new(FlakyCacheStore::new(InMemoryCacheStore::new()));
            let ledger = Arc::new(InMemoryQuotaLedger::new());
            let persistence = Persistence::new(
                Arc::clone(&blobs),
                Arc::clone(&cache),
                Arc::clone(&ledger),
                config,
            )
            .expect("test config should validate");
            Self {
                persistence,
                blobs,
                cache,
                ledger,
            }
        }

        /// Harness with the default configuration.
        pub fn with_defaults() -> Self {
            Self::new(PersistenceConfig::default())
        }

        /// Ledger total for `scope`, zero when absent.
        pub async fn allocated(&self, scope: &StorageScope) -> u64 {
            self.ledger
                .get(scope)
                .await
                .expect("ledger read should succeed")
                .map(|r| r.allocated_bytes)
                .unwrap_or(0)
        }
    }

    /// Scope used by most tests.
    pub fn test_scope() -> StorageScope {
        StorageScope::parse("tenant-a", "plugin.alpha").expect("valid scope")
    }

    /// A second scope under a different tenant.
    pub fn other_scope() -> StorageScope {
        StorageScope::parse("tenant-b", "plugin.alpha").expect("valid scope")
    }

    /// Config with a short cache TTL for expiry tests.
    pub fn short_ttl_config(ttl: Duration) -> PersistenceConfig {
        PersistenceConfig::new().with_cache_ttl(ttl)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for STASH error variants.

    use super::*;

    /// Assert that a StashResult is a QuotaExceeded error.
    #[track_caller]
    pub fn assert_quota_exceeded<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Quota(QuotaError::QuotaExceeded { .. })) => {}
            other => panic!("Expected QuotaExceeded, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Storage(StorageError::NotFound { .. })) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a StashResult is a KeyTooLong validation error.
    #[track_caller]
    pub fn assert_key_too_long<T: std::fmt::Debug>(result: &StashResult<T>, len: usize) {
        match result {
            Err(StashError::Validation(ValidationError::KeyTooLong { len: l, max })) => {
                assert_eq!(*l, len, "Wrong length in KeyTooLong error");
                assert_eq!(*max, MAX_KEY_LEN, "Wrong maximum in KeyTooLong error");
            }
            other => panic!("Expected KeyTooLong({}), got: {:?}", len, other),
        }
    }

    /// Assert that a StashResult failed with the given error kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &StashResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "Wrong error kind for {:?}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok({:?})", kind, v),
        }
    }
}
