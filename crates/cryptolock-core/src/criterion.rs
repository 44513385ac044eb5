//! cryptolock-core::criterion
//!
//! The five criterion variants: their wire type codes, the decoded creation
//! parameters (`CriterionSpec`), and the stored records each criterion store
//! keeps per instance.
//!
//! All records are serde-round-trippable for storage in sled trees. Records
//! are append-only; only `MultisigCriterion::signed` and `signed_count`
//! change after creation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::abi::{self, AbiReader, AbiValue};
use crate::constants::{
    CRITERION_CODE_BURN, CRITERION_CODE_MARKET_CAP, CRITERION_CODE_MULTISIG,
    CRITERION_CODE_PRICE, CRITERION_CODE_TIME,
};
use crate::error::LockError;
use crate::types::{Address, Amount, CriterionId, Hash32, Timestamp};

// ── CriterionType ─────────────────────────────────────────────────────────────

/// Criterion type tag. Discriminants are the fixed wire codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CriterionType {
    Time = 0,
    Burn = 1,
    Price = 2,
    MarketCap = 3,
    Multisig = 4,
}

impl CriterionType {
    pub const ALL: [CriterionType; 5] = [
        CriterionType::Time,
        CriterionType::Burn,
        CriterionType::Price,
        CriterionType::MarketCap,
        CriterionType::Multisig,
    ];

    pub fn from_code(code: u8) -> Result<Self, LockError> {
        match code {
            CRITERION_CODE_TIME => Ok(CriterionType::Time),
            CRITERION_CODE_BURN => Ok(CriterionType::Burn),
            CRITERION_CODE_PRICE => Ok(CriterionType::Price),
            CRITERION_CODE_MARKET_CAP => Ok(CriterionType::MarketCap),
            CRITERION_CODE_MULTISIG => Ok(CriterionType::Multisig),
            other => Err(LockError::UnknownCriterionType(other)),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CriterionType::Time => "time",
            CriterionType::Burn => "burn",
            CriterionType::Price => "price",
            CriterionType::MarketCap => "marketcap",
            CriterionType::Multisig => "multisig",
        };
        f.write_str(name)
    }
}

// ── Descriptor (wire form) ────────────────────────────────────────────────────

/// One `(type, data)` pair as submitted with a lock request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionDescriptor {
    pub kind: CriterionType,
    pub data: Vec<u8>,
}

impl CriterionDescriptor {
    pub fn new(kind: CriterionType, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Build from the raw integer type code used by external callers.
    pub fn from_wire(code: u8, data: Vec<u8>) -> Result<Self, LockError> {
        Ok(Self { kind: CriterionType::from_code(code)?, data })
    }

    pub fn decode(&self) -> Result<CriterionSpec, LockError> {
        CriterionSpec::decode(self)
    }
}

// ── CriterionSpec (decoded creation parameters) ──────────────────────────────

/// Decoded creation parameters for one criterion instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CriterionSpec {
    /// Satisfied `duration_secs` after lock creation.
    Time { duration_secs: u64 },
    /// Satisfied once `balanceOf(sink) / totalSupply >= target_ratio` (1e18 scale).
    Burn { sink: Address, target_ratio: Amount },
    /// Satisfied once the oracle price reaches `target_price` (1e18 scale).
    Price { target_price: Amount },
    /// Satisfied once `totalSupply × price / unit` reaches `target_market_cap`.
    MarketCap { target_market_cap: Amount },
    /// Satisfied once `threshold` distinct whitelisted addresses have signed.
    Multisig {
        threshold: u32,
        announced_signers: Vec<Address>,
        whitelist_root: Hash32,
        listing_type: u128,
    },
}

impl CriterionSpec {
    pub fn kind(&self) -> CriterionType {
        match self {
            CriterionSpec::Time { .. } => CriterionType::Time,
            CriterionSpec::Burn { .. } => CriterionType::Burn,
            CriterionSpec::Price { .. } => CriterionType::Price,
            CriterionSpec::MarketCap { .. } => CriterionType::MarketCap,
            CriterionSpec::Multisig { .. } => CriterionType::Multisig,
        }
    }

    pub fn decode(desc: &CriterionDescriptor) -> Result<Self, LockError> {
        let r = AbiReader::new(&desc.data);
        match desc.kind {
            CriterionType::Time => {
                r.expect_words(1)?;
                let duration_secs = u64::try_from(r.uint(0)?).map_err(|_| {
                    LockError::InvalidParameters("lock duration out of range".into())
                })?;
                Ok(CriterionSpec::Time { duration_secs })
            }
            CriterionType::Burn => {
                r.expect_words(2)?;
                Ok(CriterionSpec::Burn { sink: r.address(0)?, target_ratio: r.uint(1)? })
            }
            CriterionType::Price => {
                r.expect_words(1)?;
                Ok(CriterionSpec::Price { target_price: r.uint(0)? })
            }
            CriterionType::MarketCap => {
                r.expect_words(1)?;
                Ok(CriterionSpec::MarketCap { target_market_cap: r.uint(0)? })
            }
            CriterionType::Multisig => {
                r.expect_words(4)?;
                let threshold = u32::try_from(r.uint(0)?).map_err(|_| {
                    LockError::InvalidParameters("multisig threshold out of range".into())
                })?;
                Ok(CriterionSpec::Multisig {
                    threshold,
                    announced_signers: r.address_array(1)?,
                    whitelist_root: r.bytes32(2)?,
                    listing_type: r.uint(3)?,
                })
            }
        }
    }

    pub fn encode(&self) -> CriterionDescriptor {
        let data = match self {
            CriterionSpec::Time { duration_secs } => {
                abi::encode(&[AbiValue::Uint(*duration_secs as u128)])
            }
            CriterionSpec::Burn { sink, target_ratio } => {
                abi::encode(&[AbiValue::Address(*sink), AbiValue::Uint(*target_ratio)])
            }
            CriterionSpec::Price { target_price } => abi::encode(&[AbiValue::Uint(*target_price)]),
            CriterionSpec::MarketCap { target_market_cap } => {
                abi::encode(&[AbiValue::Uint(*target_market_cap)])
            }
            CriterionSpec::Multisig { threshold, announced_signers, whitelist_root, listing_type } => {
                abi::encode(&[
                    AbiValue::Uint(*threshold as u128),
                    AbiValue::AddressArray(announced_signers.clone()),
                    AbiValue::Bytes32(*whitelist_root),
                    AbiValue::Uint(*listing_type),
                ])
            }
        };
        CriterionDescriptor::new(self.kind(), data)
    }
}

// ── Stored records ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeCriterion {
    pub id: CriterionId,
    pub lock_timestamp: Timestamp,
    pub unlock_timestamp: Timestamp,
}

impl TimeCriterion {
    pub fn is_satisfied(&self, now: Timestamp) -> bool {
        now >= self.unlock_timestamp
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BurnCriterion {
    pub id: CriterionId,
    /// Token whose supply is watched (the locked token).
    pub token: Address,
    pub burn_sink: Address,
    /// Target `sink balance / total supply`, 1e18 scale.
    pub target_ratio: Amount,
    /// Ratio observed when the criterion was created.
    pub ratio_at_lock: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceCriterion {
    pub id: CriterionId,
    pub token: Address,
    /// Informational snapshot taken at creation.
    pub price_at_lock: Amount,
    pub target_price: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketCapCriterion {
    pub id: CriterionId,
    pub token: Address,
    /// Informational snapshot taken at creation.
    pub market_cap_at_lock: Amount,
    pub target_market_cap: Amount,
}

/// Signing progress of a multisig criterion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultisigStatus {
    Unsigned,
    PartiallySigned,
    /// Terminal: the threshold has been reached.
    Quorate,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigCriterion {
    pub id: CriterionId,
    pub threshold: u32,
    pub whitelist_root: Hash32,
    /// Signer list supplied at creation. Informational only; membership is
    /// decided by Merkle proof against `whitelist_root`.
    pub announced_signers: Vec<Address>,
    pub listing_type: u128,
    /// Addresses that have already signed (replay protection).
    pub signed: BTreeSet<Address>,
    pub signed_count: u32,
}

impl MultisigCriterion {
    pub fn status(&self) -> MultisigStatus {
        if self.signed_count >= self.threshold {
            MultisigStatus::Quorate
        } else if self.signed_count == 0 {
            MultisigStatus::Unsigned
        } else {
            MultisigStatus::PartiallySigned
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.status() == MultisigStatus::Quorate
    }

    pub fn has_signed(&self, signer: &Address) -> bool {
        self.signed.contains(signer)
    }
}
