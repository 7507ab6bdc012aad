//! Annotation-time checksum.
//!
//! The `time` parameter carries a lowercase hex SHA-256 digest of its decimal
//! millisecond value so that hand edits of the time are detectable.

use sha2::{Digest, Sha256};

/// Checksum of an annotation time in milliseconds.
#[must_use]
pub fn time_checksum(ms: u64) -> String {
    hex::encode(Sha256::digest(ms.to_string().as_bytes()))
}

/// Whether `checksum` matches `ms`. Case and surrounding whitespace are ignored.
#[must_use]
pub fn verify_time_checksum(ms: u64, checksum: &str) -> bool {
    time_checksum(ms).eq_ignore_ascii_case(checksum.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_zero_is_known_digest() {
        assert_eq!(
            time_checksum(0),
            "5feceb66ffc86f38d952786c6d696c79c2dbc239dd4e91b46729d73a27fb57e9"
        );
    }

    #[test]
    fn verification_ignores_case() {
        let checksum = time_checksum(123_456).to_uppercase();
        assert!(verify_time_checksum(123_456, &checksum));
        assert!(!verify_time_checksum(123_457, &checksum));
    }
}
