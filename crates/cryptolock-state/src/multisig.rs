//! Whitelist signing for multisig criteria.
//!
//! A signer proves membership with a sorted-pair Merkle proof of
//! `keccak256(address)` against the criterion's stored root. Each address
//! counts once per criterion.

use cryptolock_core::criterion::{MultisigCriterion, MultisigStatus};
use cryptolock_core::error::LockError;
use cryptolock_core::types::{Address, Hash32};
use cryptolock_crypto::{leaf_hash, verify_proof};

/// Record `signer`'s signature on `criterion`.
///
/// Fails with `ProofTooDeep` before hashing anything when the proof is longer
/// than `max_depth`, `NotWhitelisted` when the proof does not reach the root,
/// and `AlreadySigned` on a repeat. On error `criterion` is unchanged.
pub fn apply_signature(
    criterion: &mut MultisigCriterion,
    signer: &Address,
    proof: &[Hash32],
    max_depth: usize,
) -> Result<MultisigStatus, LockError> {
    if proof.len() > max_depth {
        return Err(LockError::ProofTooDeep { max: max_depth, got: proof.len() });
    }
    if !verify_proof(&criterion.whitelist_root, &leaf_hash(signer), proof) {
        return Err(LockError::NotWhitelisted);
    }
    if criterion.has_signed(signer) {
        return Err(LockError::AlreadySigned);
    }
    criterion.signed.insert(*signer);
    criterion.signed_count = criterion
        .signed_count
        .checked_add(1)
        .ok_or(LockError::ArithmeticOverflow)?;
    Ok(criterion.status())
}
