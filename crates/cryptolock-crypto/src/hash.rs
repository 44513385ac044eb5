use cryptolock_core::types::{Address, Hash32};
use sha3::{Digest, Keccak256};

/// Keccak-256 of arbitrary bytes → 32-byte array.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Whitelist leaf for an address: keccak256 over its 20 raw bytes.
pub fn leaf_hash(address: &Address) -> Hash32 {
    Hash32(keccak256(address.as_bytes()))
}

/// Parent of two nodes: the smaller one (bytewise) goes first, so proofs
/// need no left/right flags.
pub fn hash_sorted_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    Hash32(hasher.finalize().into())
}
