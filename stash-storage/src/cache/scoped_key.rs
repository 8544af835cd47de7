//! Scope-bound cache keys.
//!
//! A `ScopedCacheKey` can only be built from a [`StorageScope`], so every
//! cache operation is namespaced by tenant and plugin by construction.

use std::fmt;

use stash_core::{StorageScope, SCOPE_DELIMITER};

/// Namespace tag leading every persistence cache key.
pub const CACHE_KEY_PREFIX: &str = "persistence:cache";

/// Cache key for one (scope, key) pair.
///
/// # Text Format
///
/// `persistence:cache:{tenant_id}:{plugin_id}:{key}`
///
/// Tenant and plugin ids cannot contain `:`, so the first four segments are
/// unambiguous and the blob key may contain anything after them. All keys of
/// one scope share [`ScopedCacheKey::scope_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedCacheKey {
    inner: ScopedKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    scope: StorageScope,
    key: String,
}

impl ScopedCacheKey {
    pub fn new(scope: &StorageScope, key: &str) -> Self {
        Self {
            inner: ScopedKeyInner {
                scope: scope.clone(),
                key: key.to_string(),
            },
        }
    }

    pub fn scope(&self) -> &StorageScope {
        &self.inner.scope
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Render the text form used for get, set and del alike.
    pub fn render(&self) -> String {
        format!(
            "{}{}",
            Self::scope_prefix(&self.inner.scope),
            self.inner.key
        )
    }

    /// Parse a rendered key.
    ///
    /// Returns `None` if the namespace tag is missing or a scope segment is
    /// missing or invalid.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text
            .strip_prefix(CACHE_KEY_PREFIX)?
            .strip_prefix(SCOPE_DELIMITER)?;
        let mut parts = rest.splitn(3, SCOPE_DELIMITER);
        let tenant = parts.next()?;
        let plugin = parts.next()?;
        let key = parts.next()?;
        let scope = StorageScope::parse(tenant, plugin).ok()?;
        Some(Self::new(&scope, key))
    }

    /// Prefix shared by every cache key of a scope, delimiter included.
    pub fn scope_prefix(scope: &StorageScope) -> String {
        format!(
            "{prefix}{d}{tenant}{d}{plugin}{d}",
            prefix = CACHE_KEY_PREFIX,
            d = SCOPE_DELIMITER,
            tenant = scope.tenant_id(),
            plugin = scope.plugin_id(),
        )
    }
}

impl fmt::Display for ScopedCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
