//! Persistence configuration
//!
//! Configuration is an explicit value handed to the orchestrator at
//! construction. It can be built in code or loaded from environment
//! variables with defaults matching the platform's historical behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StashResult};
use crate::validation::MAX_KEY_LEN;

/// Default process-wide ceiling per scope: 100 MiB.
pub const DEFAULT_MAX_STORAGE_BYTES: u64 = 100 * 1024 * 1024;

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default bound on a single store call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How an overwrite of an existing key is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteAccounting {
    /// Charge only the difference against the blob being replaced.
    #[default]
    NetDelta,
    /// Charge the full new size on every write, even when replacing a blob.
    ChargeFullSize,
}

impl OverwriteAccounting {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "net_delta" => Some(Self::NetDelta),
            "charge_full_size" => Some(Self::ChargeFullSize),
            _ => None,
        }
    }
}

/// Configuration consumed by the persistence orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Absolute ceiling per scope, independent of any caller cap.
    pub max_storage_bytes: u64,
    /// Cap applied when a caller does not pass one.
    pub default_scope_cap: u64,
    /// Lifetime of entries written on a load miss.
    pub cache_ttl: Duration,
    /// Bound applied to every blob, cache and ledger call.
    pub operation_timeout: Duration,
    pub overwrite_accounting: OverwriteAccounting,
    pub max_key_len: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            default_scope_cap: DEFAULT_MAX_STORAGE_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            overwrite_accounting: OverwriteAccounting::default(),
            max_key_len: MAX_KEY_LEN,
        }
    }
}

impl PersistenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the process-wide ceiling. The default cap follows it down.
    pub fn with_max_storage_bytes(mut self, bytes: u64) -> Self {
        self.max_storage_bytes = bytes;
        self.default_scope_cap = self.default_scope_cap.min(bytes);
        self
    }

    pub fn with_default_scope_cap(mut self, bytes: u64) -> Self {
        self.default_scope_cap = bytes;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_overwrite_accounting(mut self, accounting: OverwriteAccounting) -> Self {
        self.overwrite_accounting = accounting;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STASH_MAX_STORAGE_BYTES`: per-scope ceiling (default: 104857600)
    /// - `STASH_DEFAULT_SCOPE_CAP`: cap when callers pass none (default: the ceiling)
    /// - `STASH_CACHE_TTL_SECS`: cache entry lifetime (default: 300)
    /// - `STASH_OPERATION_TIMEOUT_MS`: per-call bound (default: 10000)
    /// - `STASH_OVERWRITE_ACCOUNTING`: `net_delta` or `charge_full_size` (default: net_delta)
    pub fn from_env() -> StashResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> StashResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_storage_bytes =
            parse_var(&lookup, "STASH_MAX_STORAGE_BYTES")?.unwrap_or(DEFAULT_MAX_STORAGE_BYTES);
        let default_scope_cap =
            parse_var(&lookup, "STASH_DEFAULT_SCOPE_CAP")?.unwrap_or(max_storage_bytes);
        let cache_ttl = parse_var(&lookup, "STASH_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL);
        let operation_timeout = parse_var(&lookup, "STASH_OPERATION_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT);

        let overwrite_accounting = match lookup("STASH_OVERWRITE_ACCOUNTING") {
            Some(raw) => OverwriteAccounting::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                field: "STASH_OVERWRITE_ACCOUNTING".to_string(),
                value: raw.clone(),
                reason: "expected net_delta or charge_full_size".to_string(),
            })?,
            None => OverwriteAccounting::default(),
        };

        let config = Self {
            max_storage_bytes,
            default_scope_cap,
            cache_ttl,
            operation_timeout,
            overwrite_accounting,
            max_key_len: MAX_KEY_LEN,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_storage_bytes > 0
    /// - default_scope_cap <= max_storage_bytes
    /// - cache_ttl and operation_timeout are non-zero
    /// - max_key_len > 0
    pub fn validate(&self) -> StashResult<()> {
        if self.max_storage_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_storage_bytes".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        if self.default_scope_cap > self.max_storage_bytes {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("default_scope_cap={}", self.default_scope_cap),
                option_b: format!("max_storage_bytes={}", self.max_storage_bytes),
            }
            .into());
        }

        if self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl".to_string(),
                value: "0s".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        if self.operation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "operation_timeout".to_string(),
                value: "0ms".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        if self.max_key_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_key_len".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Resolve the cap for a call: the caller's if given, else the default.
    pub fn effective_cap(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(self.default_scope_cap)
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> StashResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| {
                ConfigError::InvalidValue {
                    field: name.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }
                .into()
            }),
        None => Ok(None),
    }
}
