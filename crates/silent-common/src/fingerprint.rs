//! Certificate fingerprints and pin comparison.
//!
//! A fingerprint is the lowercase hex SHA-256 of the peer's leaf certificate
//! in DER form. Operators pin a server by supplying that value; with no pin
//! configured the connection proceeds and the fingerprint is reported so it
//! can be pinned later.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a hex-encoded SHA-256 digest.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Pin comparison failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
pub struct FingerprintMismatch {
    /// Normalized pin that was configured.
    pub expected: String,
    /// Fingerprint presented by the peer.
    pub actual: String,
}

/// Outcome of a successful pin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    /// The presented certificate matched the configured pin.
    Verified,
    /// No pin was configured; the certificate was accepted on first use.
    Unpinned,
}

/// Computes the fingerprint of a DER-encoded certificate.
///
/// # Examples
///
/// ```
/// let fp = silent_common::fingerprint::fingerprint(b"not really a certificate");
/// assert_eq!(fp.len(), 64);
/// assert_eq!(fp, fp.to_lowercase());
/// ```
#[must_use]
pub fn fingerprint(cert_der: &[u8]) -> String {
    hex::encode(Sha256::digest(cert_der))
}

/// Groups a hex string into colon-separated byte pairs (`aabb` → `aa:bb`).
///
/// A trailing unpaired digit is dropped.
#[must_use]
pub fn format_fingerprint(hex: &str) -> String {
    hex.as_bytes()
        .chunks_exact(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect::<Vec<_>>()
        .join(":")
}

/// Canonicalizes an operator-supplied pin: lowercase, separators removed.
#[must_use]
pub fn normalize_pin(pin: &str) -> String {
    pin.chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Returns `true` if `pin` is a well-formed SHA-256 fingerprint once normalized.
#[must_use]
pub fn is_valid_pin(pin: &str) -> bool {
    let pin = normalize_pin(pin);
    pin.len() == FINGERPRINT_HEX_LEN && pin.chars().all(|c| c.is_ascii_hexdigit())
}

/// Compares the presented fingerprint against an optional pin.
///
/// # Errors
///
/// Returns [`FingerprintMismatch`] if a pin is configured and differs from
/// `actual` (compared case-insensitively).
pub fn check_pin(actual: &str, expected: Option<&str>) -> Result<PinStatus, FingerprintMismatch> {
    let Some(expected) = expected.filter(|e| !e.trim().is_empty()) else {
        return Ok(PinStatus::Unpinned);
    };
    let expected = normalize_pin(expected);
    let actual = actual.to_ascii_lowercase();
    if expected.as_bytes() == actual.as_bytes() {
        Ok(PinStatus::Verified)
    } else {
        Err(FingerprintMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_pairs_even_length() {
        assert_eq!(format_fingerprint("aabbccdd"), "aa:bb:cc:dd");
        assert_eq!(format_fingerprint("aabbccddeeff"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn format_edge_cases() {
        assert_eq!(format_fingerprint(""), "");
        assert_eq!(format_fingerprint("aa"), "aa");
        assert_eq!(format_fingerprint("aaa"), "aa");
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        // SHA-256("abc")
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn no_pin_is_trust_on_first_use() {
        assert_eq!(check_pin("deadbeef", None), Ok(PinStatus::Unpinned));
        assert_eq!(check_pin("deadbeef", Some("  ")), Ok(PinStatus::Unpinned));
    }

    #[test]
    fn matching_pin_is_case_insensitive() {
        let fp = fingerprint(b"cert");
        assert_eq!(
            check_pin(&fp, Some(&fp.to_uppercase())),
            Ok(PinStatus::Verified)
        );
        assert_eq!(
            check_pin(&fp, Some(&format_fingerprint(&fp))),
            Ok(PinStatus::Verified)
        );
    }

    #[test]
    fn differing_pin_is_mismatch() {
        let fp = fingerprint(b"cert");
        let other = fingerprint(b"other cert");
        let err = check_pin(&fp, Some(&other)).unwrap_err();
        assert_eq!(err.expected, other);
        assert_eq!(err.actual, fp);
    }

    #[test]
    fn pin_validation() {
        let fp = fingerprint(b"cert");
        assert!(is_valid_pin(&fp));
        assert!(is_valid_pin(&format_fingerprint(&fp).to_uppercase()));
        assert!(!is_valid_pin("abc"));
        assert!(!is_valid_pin(&"zz".repeat(32)));
    }
}
