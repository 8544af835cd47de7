//! Scope identity types
//!
//! Every blob, cache entry and quota record is namespaced by a
//! [`StorageScope`], the (tenant, plugin) pair a plugin installation runs in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StashResult, ValidationError};

/// Delimiter used by rendered cache keys; forbidden inside scope ids.
pub const SCOPE_DELIMITER: char = ':';

macro_rules! scope_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse an identifier, rejecting empty values and the cache key delimiter.
            pub fn new(value: impl Into<String>) -> StashResult<Self> {
                let value = value.into();
                validate_scope_part($field, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

scope_id!(
    /// Tenant that owns a plugin installation.
    TenantId,
    "tenant_id"
);

scope_id!(
    /// Installed plugin identifier.
    PluginId,
    "plugin_id"
);

fn validate_scope_part(field: &str, value: &str) -> StashResult<()> {
    if value.is_empty() {
        return Err(ValidationError::InvalidScope {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    if value.contains(SCOPE_DELIMITER) {
        return Err(ValidationError::InvalidScope {
            field: field.to_string(),
            reason: format!("must not contain '{}'", SCOPE_DELIMITER),
        }
        .into());
    }
    Ok(())
}

/// The (tenant, plugin) pair that namespaces storage and quota accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageScope {
    tenant_id: TenantId,
    plugin_id: PluginId,
}

impl StorageScope {
    pub fn new(tenant_id: TenantId, plugin_id: PluginId) -> Self {
        Self {
            tenant_id,
            plugin_id,
        }
    }

    /// Build a scope from raw identifiers.
    pub fn parse(tenant_id: impl Into<String>, plugin_id: impl Into<String>) -> StashResult<Self> {
        Ok(Self::new(TenantId::new(tenant_id)?, PluginId::new(plugin_id)?))
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.plugin_id)
    }
}

/// Bytes currently charged against a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub scope: StorageScope,
    pub allocated_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    pub fn new(scope: StorageScope, allocated_bytes: u64) -> Self {
        Self {
            scope,
            allocated_bytes,
            updated_at: Utc::now(),
        }
    }

    /// Bytes left before `limit` is reached.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.allocated_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StashError;

    #[test]
    fn test_scope_display() {
        let scope = StorageScope::parse("t1", "p1").unwrap();
        assert_eq!(scope.to_string(), "t1/p1");
        assert_eq!(scope.tenant_id().as_str(), "t1");
        assert_eq!(scope.plugin_id().as_str(), "p1");
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let err = StorageScope::parse("", "p1").unwrap_err();
        assert!(matches!(
            err,
            StashError::Validation(ValidationError::InvalidScope { ref field, .. }) if field == "tenant_id"
        ));
    }

    #[test]
    fn test_delimiter_in_plugin_rejected() {
        let err = PluginId::new("langgenius/openai:0.1").unwrap_err();
        assert!(matches!(
            err,
            StashError::Validation(ValidationError::InvalidScope { ref field, .. }) if field == "plugin_id"
        ));
    }

    #[test]
    fn test_scope_ids_serialize_transparently() {
        let tenant = TenantId::new("tenant-a").unwrap();
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"tenant-a\"");
    }

    #[test]
    fn test_quota_record_remaining() {
        let scope = StorageScope::parse("t1", "p1").unwrap();
        let record = QuotaRecord::new(scope, 60);
        assert_eq!(record.remaining(100), 40);
        assert_eq!(record.remaining(50), 0);
    }
}
