//! Sorted-pair Merkle tree over whitelist leaves.
//!
//! Construction matches the common JavaScript tooling with `sortPairs`:
//! each parent is `keccak256(min(a, b) ‖ max(a, b))`, and an unpaired node
//! at the end of a level is carried up unchanged (never duplicated).

use cryptolock_core::types::{Address, Hash32};

use crate::hash::{hash_sorted_pair, leaf_hash};

/// A fully materialised tree. Level 0 holds the leaves; the last level holds
/// the root.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<Hash32>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map(|l| l.len() > 1).unwrap_or(false) {
            let current = &levels[levels.len() - 1];
            let next: Vec<Hash32> = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(b) => hash_sorted_pair(&pair[0], b),
                    None => pair[0],
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// Tree over `leaf_hash(address)` for each address, in the given order.
    pub fn from_addresses(addresses: &[Address]) -> Self {
        Self::from_leaves(addresses.iter().map(leaf_hash).collect())
    }

    /// Root hash; zero for an empty tree.
    pub fn root(&self) -> Hash32 {
        self.levels
            .last()
            .and_then(|l| l.first().copied())
            .unwrap_or(Hash32::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Sibling path for `leaf`, bottom-up. `None` if the leaf is not in the tree.
    pub fn proof(&self, leaf: &Hash32) -> Option<Vec<Hash32>> {
        let mut index = self.levels.first()?.iter().position(|l| l == leaf)?;
        let mut path = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if let Some(h) = level.get(sibling) {
                path.push(*h);
            }
            index /= 2;
        }
        Some(path)
    }

    pub fn proof_for_address(&self, address: &Address) -> Option<Vec<Hash32>> {
        self.proof(&leaf_hash(address))
    }
}

/// Fold `proof` onto `leaf` and compare against `root`.
pub fn verify_proof(root: &Hash32, leaf: &Hash32, proof: &[Hash32]) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |acc, sibling| hash_sorted_pair(&acc, sibling));
    computed == *root
}
