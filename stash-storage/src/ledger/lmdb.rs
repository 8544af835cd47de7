//! LMDB-backed quota ledger.
//!
//! Records are JSON-serialized [`QuotaRecord`]s keyed by scope. Every
//! mutation reads, checks and writes inside one write transaction, and LMDB
//! admits a single writer at a time, so no two writers can both pass a cap
//! check against the same prior total.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, RoTxn};
use stash_core::{QuotaRecord, StashResult, StorageScope};

use super::{check_cap, floor_decrement};
use crate::lmdb::{open_database, open_env, scope_prefix, LmdbStoreError};
use crate::traits::QuotaLedger;

const LEDGER_DB: &str = "quota_ledger";

/// Durable [`QuotaLedger`] on LMDB.
pub struct LmdbQuotaLedger {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbQuotaLedger {
    /// Open a dedicated environment at `path`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let env = open_env(path, max_size_mb)?;
        Self::new(&env)
    }

    /// Open the ledger database inside an existing environment.
    pub fn new(env: &Env) -> Result<Self, LmdbStoreError> {
        let db = open_database(env, LEDGER_DB)?;
        Ok(Self {
            env: env.clone(),
            db,
        })
    }

    fn read(&self, txn: &RoTxn, key: &[u8]) -> Result<Option<QuotaRecord>, LmdbStoreError> {
        match self.db.get(txn, key)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn encode(record: &QuotaRecord) -> Result<Vec<u8>, LmdbStoreError> {
        serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl QuotaLedger for LmdbQuotaLedger {
    async fn get(&self, scope: &StorageScope) -> StashResult<Option<QuotaRecord>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        Ok(self.read(&rtxn, &scope_prefix(scope))?)
    }

    async fn get_or_init(&self, scope: &StorageScope) -> StashResult<(u64, bool)> {
        let key = scope_prefix(scope);
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        if let Some(record) = self.read(&wtxn, &key)? {
            return Ok((record.allocated_bytes, true));
        }
        let record = QuotaRecord::new(scope.clone(), 0);
        self.db
            .put(&mut wtxn, &key, &Self::encode(&record)?)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok((0, false))
    }

    async fn increment_if_within_cap(
        &self,
        scope: &StorageScope,
        delta: u64,
        local_cap: u64,
        global_cap: u64,
    ) -> StashResult<QuotaRecord> {
        let key = scope_prefix(scope);
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let mut record = self
            .read(&wtxn, &key)?
            .unwrap_or_else(|| QuotaRecord::new(scope.clone(), 0));

        // Dropping the transaction without commit aborts it.
        record.allocated_bytes =
            check_cap(scope, record.allocated_bytes, delta, local_cap, global_cap)?;
        record.updated_at = Utc::now();

        self.db
            .put(&mut wtxn, &key, &Self::encode(&record)?)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(record)
    }

    async fn decrement(&self, scope: &StorageScope, delta: u64) -> StashResult<u64> {
        let key = scope_prefix(scope);
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        let Some(mut record) = self.read(&wtxn, &key)? else {
            tracing::warn!(
                tenant = %scope.tenant_id(),
                plugin = %scope.plugin_id(),
                released = delta,
                "Quota release for a scope without a ledger record"
            );
            return Ok(0);
        };

        record.allocated_bytes = floor_decrement(scope, record.allocated_bytes, delta);
        record.updated_at = Utc::now();
        self.db
            .put(&mut wtxn, &key, &Self::encode(&record)?)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(record.allocated_bytes)
    }

    async fn set(&self, scope: &StorageScope, allocated_bytes: u64) -> StashResult<QuotaRecord> {
        let record = QuotaRecord::new(scope.clone(), allocated_bytes);
        let mut wtxn = self.env.write_txn().map_err(LmdbStoreError::from)?;
        self.db
            .put(&mut wtxn, &scope_prefix(scope), &Self::encode(&record)?)
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(record)
    }
}
