//! Key validation

use crate::error::{StashResult, ValidationError};

/// Longest key a plugin may store under.
pub const MAX_KEY_LEN: usize = 64;

/// Check a blob key against the length limit.
///
/// Length is measured in UTF-8 bytes. The empty key is a valid key.
pub fn validate_key(key: &str, max_len: usize) -> StashResult<()> {
    let len = key.len();
    if len > max_len {
        return Err(ValidationError::KeyTooLong { len, max: max_len }.into());
    }
    Ok(())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_key_length_boundary(len in 0usize..200) {
            let key = "x".repeat(len);
            let result = validate_key(&key, MAX_KEY_LEN);
            prop_assert_eq!(result.is_ok(), len <= MAX_KEY_LEN);
        }
    }
}
