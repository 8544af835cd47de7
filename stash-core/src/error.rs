//! Error types for STASH operations

use thiserror::Error;

/// Input validation errors. Always raised before any storage interaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Key too long: {len} bytes exceeds the maximum of {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Invalid scope {field}: {reason}")]
    InvalidScope { field: String, reason: String },
}

/// Quota accounting errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error(
        "Quota exceeded for {scope}: requested {requested} bytes with {allocated} allocated, limit {limit}"
    )]
    QuotaExceeded {
        scope: String,
        requested: u64,
        allocated: u64,
        limit: u64,
    },

    #[error("Ledger overflow for {scope}: {allocated} + {requested} does not fit in u64")]
    Overflow {
        scope: String,
        requested: u64,
        allocated: u64,
    },
}

/// Blob store and ledger errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Blob not found: {key} in {scope}")]
    NotFound { scope: String, key: String },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Operation {operation} timed out")]
    Timeout { operation: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Background task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Cache store errors. A missing entry is not an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend failure: {reason}")]
    Backend { reason: String },

    #[error("Cache entry {key} could not be decoded: {reason}")]
    Decode { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Coarse classification of a [`StashError`].
///
/// Callers branch on this to choose between a quota message, a not-found
/// message, or a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyTooLong,
    QuotaExceeded,
    NotFound,
    Validation,
    Storage,
    Cache,
    Config,
}

/// Master error type for all STASH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StashError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StashError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(ValidationError::KeyTooLong { .. }) => ErrorKind::KeyTooLong,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Quota(QuotaError::QuotaExceeded { .. }) => ErrorKind::QuotaExceeded,
            Self::Quota(QuotaError::Overflow { .. }) => ErrorKind::QuotaExceeded,
            Self::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.kind() == ErrorKind::QuotaExceeded
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Wrap an arbitrary backend failure.
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Storage(StorageError::Backend {
            reason: reason.into(),
        })
    }
}

/// Result type alias for STASH operations.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_too_long_display() {
        let err = ValidationError::KeyTooLong { len: 65, max: 64 };
        let msg = format!("{}", err);
        assert!(msg.contains("65"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_quota_exceeded_display() {
        let err = QuotaError::QuotaExceeded {
            scope: "t1/p1".to_string(),
            requested: 60,
            allocated: 50,
            limit: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Quota exceeded"));
        assert!(msg.contains("t1/p1"));
        assert!(msg.contains("60"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_storage_error_display_timeout() {
        let err = StorageError::Timeout {
            operation: "blob.save".to_string(),
        };
        assert!(format!("{}", err).contains("blob.save"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "cache_ttl".to_string(),
            value: "abc".to_string(),
            reason: "must be an integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cache_ttl"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("must be an integer"));
    }

    #[test]
    fn test_error_kinds() {
        let too_long = StashError::from(ValidationError::KeyTooLong { len: 65, max: 64 });
        assert_eq!(too_long.kind(), ErrorKind::KeyTooLong);

        let bad_scope = StashError::from(ValidationError::InvalidScope {
            field: "tenant_id".to_string(),
            reason: "must not be empty".to_string(),
        });
        assert_eq!(bad_scope.kind(), ErrorKind::Validation);

        let quota = StashError::from(QuotaError::QuotaExceeded {
            scope: "s".to_string(),
            requested: 1,
            allocated: 0,
            limit: 0,
        });
        assert!(quota.is_quota_exceeded());

        let missing = StashError::from(StorageError::NotFound {
            scope: "s".to_string(),
            key: "k".to_string(),
        });
        assert!(missing.is_not_found());

        let poisoned = StashError::from(StorageError::LockPoisoned);
        assert_eq!(poisoned.kind(), ErrorKind::Storage);

        let cache = StashError::from(CacheError::Backend {
            reason: "down".to_string(),
        });
        assert_eq!(cache.kind(), ErrorKind::Cache);

        let config = StashError::from(ConfigError::IncompatibleOptions {
            option_a: "a".to_string(),
            option_b: "b".to_string(),
        });
        assert_eq!(config.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_backend_helper() {
        let err = StashError::backend("disk full");
        assert!(matches!(
            err,
            StashError::Storage(StorageError::Backend { ref reason }) if reason == "disk full"
        ));
    }
}
