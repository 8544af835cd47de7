//! STASH Core - Scope, Quota and Error Types
//!
//! Pure data structures shared by the storage layer and its callers.
//! This crate performs no I/O.

pub mod config;
pub mod error;
pub mod scope;
pub mod validation;

pub use config::{
    OverwriteAccounting, PersistenceConfig, DEFAULT_CACHE_TTL, DEFAULT_MAX_STORAGE_BYTES,
    DEFAULT_OPERATION_TIMEOUT,
};
pub use error::{
    CacheError, ConfigError, ErrorKind, QuotaError, StashError, StashResult, StorageError,
    ValidationError,
};
pub use scope::{PluginId, QuotaRecord, StorageScope, TenantId, SCOPE_DELIMITER};
pub use validation::{validate_key, MAX_KEY_LEN};
