use thiserror::Error;

use crate::criterion::CriterionType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    // ── Policy expression ────────────────────────────────────────────────────
    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("stored policy violates an invariant: {0}")]
    PolicyInvariant(String),

    // ── Criterion construction ───────────────────────────────────────────────
    /// Displays the bare reason; callers match on these strings.
    #[error("{0}")]
    InvalidParameters(String),

    #[error("unknown criterion type code {0}")]
    UnknownCriterionType(u8),

    #[error("{kind} criterion not found: {id}")]
    CriterionNotFound { kind: CriterionType, id: u64 },

    // ── Multisig signing ─────────────────────────────────────────────────────
    #[error("not whitelisted")]
    NotWhitelisted,

    #[error("already signed")]
    AlreadySigned,

    #[error("merkle proof too deep: max {max} siblings, got {got}")]
    ProofTooDeep { max: usize, got: usize },

    // ── Lock lifecycle ───────────────────────────────────────────────────────
    #[error("Unlock Conditions Mismatch")]
    UnlockConditionsMismatch,

    #[error("lock not found: {0}")]
    LockNotFound(u64),

    #[error("only the lock owner may unlock")]
    NotLockOwner,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("unsupported unlock mode {0}")]
    UnsupportedUnlockMode(u8),

    // ── External collaborators ───────────────────────────────────────────────
    #[error("custody transfer failed: {0}")]
    CustodyTransferFailed(String),

    #[error("unknown token: {0}")]
    UnknownToken(String),

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("insufficient allowance: need {need}, have {have}")]
    InsufficientAllowance { need: u128, have: u128 },

    #[error("price unavailable for token {0}")]
    OracleUnavailable(String),

    // ── Arithmetic ───────────────────────────────────────────────────────────
    #[error("fixed-point arithmetic overflow")]
    ArithmeticOverflow,

    #[error("division by zero")]
    DivisionByZero,

    // ── Encoding / storage ───────────────────────────────────────────────────
    #[error("abi decode error: {0}")]
    AbiDecode(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}
