//! Credential digests and decoy filler generation.

use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::ops::RangeInclusive;

/// Derives the credential sent in an auth message: lowercase hex SHA-256 of
/// the password. Only the digest travels; the raw password stays local.
///
/// # Examples
///
/// ```
/// let digest = silent_common::crypto::credential_digest("hunter2");
/// assert_eq!(digest.len(), 64);
/// assert_ne!(digest, "hunter2");
/// ```
#[must_use]
pub fn credential_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Returns `len` random alphanumeric characters.
#[must_use]
pub fn random_filler(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// Returns a random alphanumeric string whose length is drawn uniformly
/// from `len`.
#[must_use]
pub fn random_filler_in(len: RangeInclusive<usize>) -> String {
    let n = rand::thread_rng().gen_range(len);
    random_filler(n)
}
