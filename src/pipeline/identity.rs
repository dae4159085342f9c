//! Identity hashing, field validation, and cell sanitization.
//!
//! Pure leaf functions shared by the pipeline and the dedup/suppression
//! checks. The hash must be computed identically at ingestion time and at
//! any later lookup, so all normalization lives here.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("email regex"));

/// Minimum digits for a plausible phone number.
const PHONE_MIN_DIGITS: usize = 10;
/// Maximum digits per E.164.
const PHONE_MAX_DIGITS: usize = 15;

/// Deterministic fingerprint of a contact record.
///
/// SHA-256 over lowercased trimmed name, lowercased trimmed email, and the
/// digits of the phone, concatenated. Case and incidental whitespace never
/// change the hash.
pub fn record_hash(name: &str, email: &str, phone: &str) -> String {
    let input = format!(
        "{}{}{}",
        name.trim().to_lowercase(),
        email.trim().to_lowercase(),
        normalize_phone(phone)
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// Strip everything but digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Standard address-shape check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// A phone is usable when it has 10–15 digits after stripping separators.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = normalize_phone(phone).len();
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
}

/// Neutralize spreadsheet formula injection.
///
/// A trimmed value starting with `=`, `+`, `-`, `@`, tab, or carriage
/// return gets a literal single quote prefixed before storage.
pub fn sanitize_cell(value: &str) -> String {
    let trimmed = value.trim();
    if matches!(
        trimmed.chars().next(),
        Some('=') | Some('+') | Some('-') | Some('@') | Some('\t') | Some('\r')
    ) {
        format!("'{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_across_case_and_whitespace() {
        let a = record_hash("John Doe", "john@x.com", "1234567890");
        let b = record_hash("  JOHN DOE ", "JOHN@X.COM", "123-456-7890");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_for_different_identities() {
        let a = record_hash("John Doe", "john@x.com", "1234567890");
        let b = record_hash("Jane Doe", "john@x.com", "1234567890");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = record_hash("a", "b", "c");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn phone_normalization_strips_separators() {
        assert_eq!(normalize_phone("+1 (234) 567-890"), "1234567890");
        assert_eq!(normalize_phone("no digits"), "");
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("john@x.com"));
        assert!(is_valid_email("a.b-c@mail.example.org"));
        assert!(!is_valid_email("bad-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@x.com"));
    }

    #[test]
    fn phone_validation_digit_bounds() {
        assert!(is_valid_phone("1234567890"));
        assert!(is_valid_phone("+27 82 123 4567"));
        assert!(is_valid_phone("123456789012345"));
        assert!(!is_valid_phone("123"));
        assert!(!is_valid_phone("1234567890123456"));
    }

    #[test]
    fn sanitize_neutralizes_formula_prefixes() {
        assert_eq!(sanitize_cell("=2+2"), "'=2+2");
        assert_eq!(sanitize_cell("+SUM(A1)"), "'+SUM(A1)");
        assert_eq!(sanitize_cell("-1"), "'-1");
        assert_eq!(sanitize_cell("@cmd"), "'@cmd");
        assert_eq!(sanitize_cell("  =2+2  "), "'=2+2");
    }

    #[test]
    fn sanitize_leaves_ordinary_values_alone() {
        assert_eq!(sanitize_cell("John Doe"), "John Doe");
        assert_eq!(sanitize_cell("a=b"), "a=b");
        assert_eq!(sanitize_cell(" trimmed "), "trimmed");
        assert_eq!(sanitize_cell(""), "");
    }
}
