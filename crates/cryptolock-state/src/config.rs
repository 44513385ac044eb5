use cryptolock_core::constants::{
    DEAD_ADDRESS, DEFAULT_CUSTODY_ADDRESS, DEFAULT_MAX_EXPRESSION_TOKENS, DEFAULT_MAX_PROOF_DEPTH,
};
use cryptolock_core::error::LockError;
use cryptolock_core::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::fee::FeeSchedule;

/// Engine settings. Loaded from JSON by the binary and persisted in the
/// `meta` tree so later runs see the same values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address that holds locked tokens in the token ledger.
    pub custody_address: Address,
    pub fee: FeeSchedule,
    /// Addresses accepted as burn sinks by burn criteria.
    pub burn_sinks: BTreeSet<Address>,
    pub max_expression_tokens: usize,
    pub max_proof_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            custody_address: DEFAULT_CUSTODY_ADDRESS,
            fee: FeeSchedule::default(),
            burn_sinks: BTreeSet::from([DEAD_ADDRESS]),
            max_expression_tokens: DEFAULT_MAX_EXPRESSION_TOKENS,
            max_proof_depth: DEFAULT_MAX_PROOF_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), LockError> {
        if self.custody_address.is_zero() {
            return Err(LockError::Config("custody address must not be zero".into()));
        }
        if self.max_expression_tokens == 0 {
            return Err(LockError::Config("max_expression_tokens must be at least 1".into()));
        }
        if self.fee.fee_percent > cryptolock_core::constants::FIXED_POINT_ONE {
            return Err(LockError::Config("fee_percent must not exceed 1e18".into()));
        }
        if self.fee.fee_wallet == Some(self.custody_address) {
            return Err(LockError::Config("fee wallet must differ from custody".into()));
        }
        Ok(())
    }
}
