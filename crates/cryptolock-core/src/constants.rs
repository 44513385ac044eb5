/// ─── CryptoLock Engine Constants ────────────────────────────────────────────
///
/// Fixed-point values (ratios, prices, market caps, fee percentages) are
/// unsigned integers scaled by 1e18, so 1.0 == `FIXED_POINT_ONE`.

use crate::types::Address;

// ── Fixed point ───────────────────────────────────────────────────────────────

/// 1.0 in the 1e18 fixed-point scale.
pub const FIXED_POINT_ONE: u128 = 1_000_000_000_000_000_000;

// ── Wire format ───────────────────────────────────────────────────────────────

/// Width of one encoded word in criterion and unlock payloads.
pub const ABI_WORD_BYTES: usize = 32;

/// Criterion type codes as they appear on the wire.
pub const CRITERION_CODE_TIME: u8 = 0;
pub const CRITERION_CODE_BURN: u8 = 1;
pub const CRITERION_CODE_PRICE: u8 = 2;
pub const CRITERION_CODE_MARKET_CAP: u8 = 3;
pub const CRITERION_CODE_MULTISIG: u8 = 4;

/// Unlock auxiliary modes.
pub const UNLOCK_MODE_FULL: u8 = 0;
pub const UNLOCK_MODE_FRACTION: u8 = 1;

// ── Expression limits ─────────────────────────────────────────────────────────

/// Default upper bound on the number of tokens in one policy expression.
pub const DEFAULT_MAX_EXPRESSION_TOKENS: usize = 64;

/// Default upper bound on Merkle proof length accepted by `sign`.
/// 32 levels covers whitelists of up to 2^32 members.
pub const DEFAULT_MAX_PROOF_DEPTH: usize = 32;

// ── Well-known addresses ──────────────────────────────────────────────────────

/// Conventional burn sink `0x000000000000000000000000000000000000dEaD`.
pub const DEAD_ADDRESS: Address = Address([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xde, 0xad,
]);

/// Custody address used when no engine configuration supplies one.
pub const DEFAULT_CUSTODY_ADDRESS: Address = Address([
    0xc0, 0x57, 0x0d, 0x1a, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
]);
