//! Cache stores and scope-bound cache keys.
//!
//! The cache is a pure read accelerator. Loads populate it on a miss, saves
//! and deletes only invalidate, and no correctness property depends on an
//! entry being present.

pub mod lmdb_backend;
pub mod memory;
pub mod scoped_key;

pub use lmdb_backend::LmdbCacheStore;
pub use memory::InMemoryCacheStore;
pub use scoped_key::{ScopedCacheKey, CACHE_KEY_PREFIX};
