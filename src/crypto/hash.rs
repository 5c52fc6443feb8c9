/// Hashing utilities for blueblock-anchor.
///
/// SHA-256 is the digest behind every Merkle leaf and node, and it must
/// stay SHA-256: roots already anchored by the web application were built
/// with it. SHA-512/256 is only used for ledger identifiers (transaction
/// ids, address checksums).
use sha2::{Digest, Sha256, Sha512_256};

/// Length of every digest produced here.
pub const DIGEST_LEN: usize = 32;

/// Hash arbitrary data with SHA-256.
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash the concatenation `left || right` without an intermediate buffer.
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// SHA-512/256, the ledger's identifier hash.
pub fn sha512_256(data: &[u8]) -> [u8; 32] {
    Sha512_256::digest(data).into()
}
