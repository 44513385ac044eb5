pub mod address;
pub mod hash;
pub mod merkle;

pub use address::random_address;
pub use hash::{hash_sorted_pair, keccak256, leaf_hash};
pub use merkle::{verify_proof, MerkleTree};
