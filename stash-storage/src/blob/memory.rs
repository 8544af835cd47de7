//! In-memory blob store for testing and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use stash_core::{StashResult, StorageError, StorageScope};

use crate::traits::BlobStore;

type BlobKey = (StorageScope, String);

/// In-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs across all scopes.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> StashResult<()> {
        self.blobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

fn blob_key(scope: &StorageScope, key: &str) -> BlobKey {
    (scope.clone(), key.to_string())
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn save(&self, scope: &StorageScope, key: &str, data: &[u8]) -> StashResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| StorageError::LockPoisoned)?;
        blobs.insert(blob_key(scope, key), data.to_vec());
        Ok(())
    }

    async fn load(&self, scope: &StorageScope, key: &str) -> StashResult<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.get(&blob_key(scope, key)).cloned())
    }

    async fn delete(&self, scope: &StorageScope, key: &str) -> StashResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| StorageError::LockPoisoned)?;
        blobs.remove(&blob_key(scope, key));
        Ok(())
    }

    async fn size_of(&self, scope: &StorageScope, key: &str) -> StashResult<Option<u64>> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.get(&blob_key(scope, key)).map(|b| b.len() as u64))
    }

    async fn list_keys(&self, scope: &StorageScope) -> StashResult<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut keys: Vec<String> = blobs
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
