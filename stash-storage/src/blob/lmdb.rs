//! LMDB-backed blob store.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env};
use stash_core::{StashResult, StorageScope};

use crate::lmdb::{open_database, open_env, scope_prefix, scoped_key, LmdbStoreError};
use crate::traits::BlobStore;

const BLOB_DB: &str = "blobs";

/// Durable [`BlobStore`] on LMDB. Each save or delete is its own write
/// transaction, so a single-key write is never torn.
pub struct LmdbBlobStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbBlobStore {
    /// Open a dedicated environment at `path`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let env = open_env(path, max_size_mb)?;
        Self::new(&env)
    }

    /// Open the blob database inside an existing environment.
    pub fn new(env: &Env) -> Result<Self, LmdbStoreError> {
        let db = open_database(env, BLOB_DB)?;
        Ok(Self {
            env: env.clone(),
            db,
        })
    }
}

#[async_trait]
impl BlobStore for LmdbBlobStore {
    async fn save(&self, scope: &StorageScope, key: &str, data: &[u8]) -> StashResult<()> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .put(&mut wtxn, &scoped_key(scope, key), data)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let data = self
            .db
            .get(&rtxn, &scoped_key(scope, key))
            .map_err(LmdbStoreError::from)?
            .map(|bytes| bytes.to_vec());
        Ok(data)
    }

    async fn delete(&self, scope: &StorageScope, key: &str) -> StashResult<()> {
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .delete(&mut wtxn, &scoped_key(scope, key))
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn size_of(&self, scope: &StorageScope, key: &str) -> StashResult<Option<u64>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let size = self
            .db
            .get(&rtxn, &scoped_key(scope, key))
            .map_err(LmdbStoreError::from)?
            .map(|bytes| bytes.len() as u64);
        Ok(size)
    }

    async fn list_keys(&self, scope: &StorageScope) -> StashResult<Vec<String>> {
        let prefix = scope_prefix(scope);
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let iter = self
            .db
            .prefix_iter(&rtxn, &prefix)
            .map_err(LmdbStoreError::from)?;

        let mut keys = Vec::new();
        for entry in iter {
            let (raw, _) = entry.map_err(LmdbStoreError::from)?;
            let key = std::str::from_utf8(&raw[prefix.len()..])
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }
}
