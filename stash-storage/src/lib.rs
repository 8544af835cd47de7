//! STASH Storage - Quota-Enforcing Plugin Persistence
//!
//! Collaborator traits for the blob store, cache and quota ledger, in-memory
//! and LMDB implementations of each, and the [`Persistence`] orchestrator
//! that composes them.

pub mod blob;
pub mod cache;
pub mod ledger;
pub mod lmdb;
pub mod locks;
pub mod persistence;
pub mod traits;

pub use blob::{InMemoryBlobStore, LmdbBlobStore};
pub use cache::{InMemoryCacheStore, LmdbCacheStore, ScopedCacheKey, CACHE_KEY_PREFIX};
pub use ledger::{InMemoryQuotaLedger, LmdbQuotaLedger};
pub use lmdb::{open_env, LmdbStoreError};
pub use locks::{KeyedGuard, KeyedLocks};
pub use persistence::{Persistence, ReconcileReport};
pub use traits::{BlobStore, CacheStats, CacheStore, QuotaLedger};

// Re-export the heed environment so callers can share one across stores.
pub use heed::Env as LmdbEnv;

/// Orchestrator over the in-memory stores.
pub type InMemoryPersistence =
    Persistence<InMemoryBlobStore, InMemoryCacheStore, InMemoryQuotaLedger>;

/// Orchestrator over the LMDB stores.
pub type LmdbPersistence = Persistence<LmdbBlobStore, LmdbCacheStore, LmdbQuotaLedger>;
