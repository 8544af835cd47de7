//! Shared LMDB plumbing for the durable stores.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment can host the
//! blob, ledger and cache databases side by side; each store opens its own
//! named database inside it.
//!
//! # Key Layout
//!
//! Scoped keys are `[tenant_id][0xFF][plugin_id][0xFF][key]`. The separator
//! byte never occurs in UTF-8 text, so keys sort by tenant then plugin and a
//! scope's entries form one contiguous prefix range.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stash_core::{StashError, StorageError, StorageScope};

/// Separator byte between key segments.
const SEPARATOR: u8 = 0xFF;

/// Named databases an environment may hold.
const MAX_DBS: u32 = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

impl From<LmdbStoreError> for StashError {
    fn from(e: LmdbStoreError) -> Self {
        StashError::Storage(StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

/// Open (creating if needed) an LMDB environment at `path`.
///
/// `max_size_mb` bounds the memory map and therefore the total data size.
pub fn open_env<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Env, LmdbStoreError> {
    std::fs::create_dir_all(&path)?;

    // SAFETY: the environment must not be opened twice in one process. Callers
    // share the returned `Env` (it is reference counted) instead of reopening.
    unsafe {
        EnvOpenOptions::new()
            .map_size(max_size_mb * 1024 * 1024)
            .max_dbs(MAX_DBS)
            .open(path.as_ref())
    }
    .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))
}

/// Create or open the named byte database `name`.
pub(crate) fn open_database(env: &Env, name: &str) -> Result<Database<Bytes, Bytes>, LmdbStoreError> {
    let mut wtxn = env.write_txn()?;
    let db = env
        .create_database::<Bytes, Bytes>(&mut wtxn, Some(name))
        .map_err(|e| LmdbStoreError::DbOpen {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    wtxn.commit()?;
    Ok(db)
}

/// Prefix covering every key of a scope.
pub(crate) fn scope_prefix(scope: &StorageScope) -> Vec<u8> {
    let tenant = scope.tenant_id().as_str().as_bytes();
    let plugin = scope.plugin_id().as_str().as_bytes();
    let mut bytes = Vec::with_capacity(tenant.len() + plugin.len() + 2);
    bytes.extend_from_slice(tenant);
    bytes.push(SEPARATOR);
    bytes.extend_from_slice(plugin);
    bytes.push(SEPARATOR);
    bytes
}

/// Full key for (scope, key).
pub(crate) fn scoped_key(scope: &StorageScope, key: &str) -> Vec<u8> {
    let mut bytes = scope_prefix(scope);
    bytes.extend_from_slice(key.as_bytes());
    bytes
}
