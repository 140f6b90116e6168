//! SHA-256 helpers shared by the ledger hash chain and record anchoring.

use sha2::{Digest, Sha256};

/// Prefix used for ledger transaction ids.
pub const TX_ID_PREFIX: &str = "sha256:";

/// Lowercase hex SHA-256 of `bytes`. This is the plaintext anchor format stored
/// on records as `contentDigest`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Prefixed SHA-256 of a canonical string, used for transaction ids.
pub fn prefixed_sha256(canonical: &str) -> String {
    format!("{}{}", TX_ID_PREFIX, sha256_hex(canonical.as_bytes()))
}
