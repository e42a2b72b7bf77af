//! One-way credential fingerprinting
//!
//! Audit records and log lines identify which credential made a call without
//! ever carrying the secret itself. The fingerprint is a truncated
//! URL-safe base64 encoding of the SHA-256 digest, so two deployments with
//! the same secret produce the same fingerprint and nothing about the secret
//! can be recovered from it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Number of base64 characters kept from the digest. 16 characters of a
/// SHA-256 digest is plenty to tell a handful of pool credentials apart.
const FINGERPRINT_LEN: usize = 16;

/// Compute the one-way fingerprint of a credential secret.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded[..FINGERPRINT_LEN].to_string()
}
