//! Quota ledger implementations.
//!
//! Both ledgers run the cap check and the commit as one critical section:
//! the in-memory ledger under a single mutex, the LMDB ledger inside one
//! write transaction (LMDB admits one writer at a time).

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbQuotaLedger;
pub use memory::InMemoryQuotaLedger;

use stash_core::{QuotaError, StashResult, StorageScope};

/// New total after charging `delta`, or the error that rejects it.
///
/// A zero charge always passes so that rewriting a blob at its current size
/// never fails because a caller's cap has since dropped below the total.
pub(crate) fn check_cap(
    scope: &StorageScope,
    current: u64,
    delta: u64,
    local_cap: u64,
    global_cap: u64,
) -> StashResult<u64> {
    if delta == 0 {
        return Ok(current);
    }
    let new_total = current.checked_add(delta).ok_or_else(|| QuotaError::Overflow {
        scope: scope.to_string(),
        requested: delta,
        allocated: current,
    })?;
    let limit = local_cap.min(global_cap);
    if new_total > limit {
        return Err(QuotaError::QuotaExceeded {
            scope: scope.to_string(),
            requested: delta,
            allocated: current,
            limit,
        }
        .into());
    }
    Ok(new_total)
}

/// Subtract `delta`, flooring at zero and logging when the ledger held less
/// than is being released.
pub(crate) fn floor_decrement(scope: &StorageScope, current: u64, delta: u64) -> u64 {
    if delta > current {
        tracing::warn!(
            tenant = %scope.tenant_id(),
            plugin = %scope.plugin_id(),
            allocated = current,
            released = delta,
            "Quota ledger released more bytes than it held; flooring at zero"
        );
    }
    current.saturating_sub(delta)
}
