//! In-memory quota ledger.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use stash_core::{QuotaRecord, StashResult, StorageError, StorageScope};

use super::{check_cap, floor_decrement};
use crate::traits::QuotaLedger;

/// In-memory [`QuotaLedger`]. One mutex guards every record, so each
/// operation is a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    records: Mutex<HashMap<StorageScope, QuotaRecord>>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes with a record.
    pub fn scope_count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn get(&self, scope: &StorageScope) -> StashResult<Option<QuotaRecord>> {
        let records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.get(scope).cloned())
    }

    async fn get_or_init(&self, scope: &StorageScope) -> StashResult<(u64, bool)> {
        let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        match records.get(scope) {
            Some(record) => Ok((record.allocated_bytes, true)),
            None => {
                records.insert(scope.clone(), QuotaRecord::new(scope.clone(), 0));
                Ok((0, false))
            }
        }
    }

    async fn increment_if_within_cap(
        &self,
        scope: &StorageScope,
        delta: u64,
        local_cap: u64,
        global_cap: u64,
    ) -> StashResult<QuotaRecord> {
        let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        let current = records.get(scope).map(|r| r.allocated_bytes).unwrap_or(0);
        let new_total = check_cap(scope, current, delta, local_cap, global_cap)?;

        let record = records
            .entry(scope.clone())
            .or_insert_with(|| QuotaRecord::new(scope.clone(), 0));
        record.allocated_bytes = new_total;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn decrement(&self, scope: &StorageScope, delta: u64) -> StashResult<u64> {
        let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        match records.get_mut(scope) {
            Some(record) => {
                record.allocated_bytes = floor_decrement(scope, record.allocated_bytes, delta);
                record.updated_at = Utc::now();
                Ok(record.allocated_bytes)
            }
            None => {
                tracing::warn!(
                    tenant = %scope.tenant_id(),
                    plugin = %scope.plugin_id(),
                    released = delta,
                    "Quota release for a scope without a ledger record"
                );
                Ok(0)
            }
        }
    }

    async fn set(&self, scope: &StorageScope, allocated_bytes: u64) -> StashResult<QuotaRecord> {
        let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        let record = QuotaRecord::new(scope.clone(), allocated_bytes);
        records.insert(scope.clone(), record.clone());
        Ok(record)
    }
}
