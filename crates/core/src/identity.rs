use sha2::{Digest, Sha256};

/// Number of leading characters that must agree between email and USN.
pub const IDENTITY_PREFIX_LEN: usize = 10;

/// Returns `true` when the email and USN form an admissible voting identity.
///
/// Institutional addresses embed the student's USN as the start of the local
/// part, so both values must be at least [`IDENTITY_PREFIX_LEN`] characters
/// long and their first [`IDENTITY_PREFIX_LEN`] characters must match when
/// compared case-insensitively. Shorter inputs are always rejected.
///
/// This is a plausibility check only; no identity provider is consulted.
pub fn validate(email: &str, usn: &str) -> bool {
    if email.chars().count() < IDENTITY_PREFIX_LEN || usn.chars().count() < IDENTITY_PREFIX_LEN {
        return false;
    }

    let email_prefix = email.chars().take(IDENTITY_PREFIX_LEN).flat_map(char::to_lowercase);
    let usn_prefix = usn.chars().take(IDENTITY_PREFIX_LEN).flat_map(char::to_lowercase);
    email_prefix.eq(usn_prefix)
}

/// Derives the stored identity fingerprint for a vote.
///
/// Lower-cased SHA-256 over `email` followed by `usn`, hex encoded. Kept for
/// traceability only; duplicate detection compares the raw fields.
pub fn fingerprint(email: &str, usn: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.to_lowercase().as_bytes());
    hasher.update(usn.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Case-insensitive equality used when comparing identity fields.
pub(crate) fn same_identity_field(left: &str, right: &str) -> bool {
    left.to_lowercase() == right.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_prefix_regardless_of_case() {
        assert!(validate("1MS22CS001@gmail.com", "1ms22cs001"));
        assert!(validate("1ms22cs001@college.edu", "1MS22CS001"));
    }

    #[test]
    fn rejects_short_inputs() {
        assert!(!validate("short@x.co", "1ms22cs001"));
        assert!(!validate("1ms22cs001@x.com", "1ms22cs"));
        assert!(!validate("", ""));
    }

    #[test]
    fn rejects_mismatched_prefix() {
        assert!(!validate("1ms22cs002@x.com", "1ms22cs001"));
        assert!(!validate("alice.smith@x.com", "1ms22cs001"));
    }

    #[test]
    fn exact_ten_characters_are_enough() {
        assert!(validate("1ms22cs001", "1MS22CS001"));
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Nine characters, more than ten bytes.
        assert!(!validate("ééééééééé@x.com", "ééééééééé"));
        assert!(validate("éééééééééé@x.com", "ÉÉÉÉÉÉÉÉÉÉ"));
    }

    #[test]
    fn fingerprint_ignores_case_but_not_order() {
        let a = fingerprint("1MS22CS001@x.com", "1ms22cs001");
        let b = fingerprint("1ms22cs001@X.COM", "1MS22CS001");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let swapped = fingerprint("1ms22cs001", "1ms22cs001@x.com");
        assert_ne!(a, swapped);
    }
}
