use cryptolock_core::constants::FIXED_POINT_ONE;
use cryptolock_core::error::LockError;
use cryptolock_core::math::mul_div;
use cryptolock_core::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the creation fee is charged for a given locked token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeMode {
    /// `flat_fee` units of `fee_token`, pulled from the owner.
    Flat,
    /// `amount × fee_percent / 1e18` of the locked token, taken from custody.
    Percent,
}

/// Treasury settings applied by `LockEngine::create`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Receiver of all fees. No fee is charged while unset.
    pub fee_wallet: Option<Address>,
    /// Token charged in flat mode.
    pub fee_token: Option<Address>,
    pub flat_fee: Amount,
    /// 1e18 scale, at most 1e18.
    pub fee_percent: Amount,
    /// Tokens toggled into percent mode; every other token pays the flat fee.
    pub percent_tokens: BTreeSet<Address>,
}

/// The fee a particular lock request owes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeeCharge {
    None,
    Flat { wallet: Address, token: Address, amount: Amount },
    Percent { wallet: Address, amount: Amount },
}

impl FeeCharge {
    /// Amount remaining in custody for the lock after this fee.
    pub fn net_of(&self, locked: Amount) -> Amount {
        match self {
            FeeCharge::Percent { amount, .. } => locked - amount,
            _ => locked,
        }
    }

    pub fn paid(&self) -> Amount {
        match self {
            FeeCharge::None => 0,
            FeeCharge::Flat { amount, .. } | FeeCharge::Percent { amount, .. } => *amount,
        }
    }
}

impl FeeSchedule {
    pub fn mode_for(&self, token: &Address) -> FeeMode {
        if self.percent_tokens.contains(token) {
            FeeMode::Percent
        } else {
            FeeMode::Flat
        }
    }

    /// Flip `token` between flat and percent mode. Returns the new mode.
    pub fn toggle_mode(&mut self, token: Address) -> FeeMode {
        if !self.percent_tokens.remove(&token) {
            self.percent_tokens.insert(token);
        }
        self.mode_for(&token)
    }

    pub fn set_fee_percent(&mut self, percent: Amount) -> Result<(), LockError> {
        if percent > FIXED_POINT_ONE {
            return Err(LockError::InvalidParameters(
                "fee percent must not exceed 1e18".into(),
            ));
        }
        self.fee_percent = percent;
        Ok(())
    }

    /// Work out what locking `amount` of `token` costs.
    pub fn quote(&self, token: &Address, amount: Amount) -> Result<FeeCharge, LockError> {
        let Some(wallet) = self.fee_wallet else {
            return Ok(FeeCharge::None);
        };
        match self.mode_for(token) {
            FeeMode::Percent => {
                let fee = mul_div(amount, self.fee_percent, FIXED_POINT_ONE)?;
                if fee == 0 {
                    return Ok(FeeCharge::None);
                }
                if fee >= amount {
                    return Err(LockError::InvalidParameters(
                        "fee consumes the whole locked amount".into(),
                    ));
                }
                Ok(FeeCharge::Percent { wallet, amount: fee })
            }
            FeeMode::Flat => match self.fee_token {
                Some(fee_token) if self.flat_fee > 0 => Ok(FeeCharge::Flat {
                    wallet,
                    token: fee_token,
                    amount: self.flat_fee,
                }),
                _ => Ok(FeeCharge::None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: Address = Address([1u8; 20]);
    const FEE_TOKEN: Address = Address([2u8; 20]);
    const WALLET: Address = Address([3u8; 20]);

    fn schedule() -> FeeSchedule {
        FeeSchedule {
            fee_wallet: Some(WALLET),
            fee_token: Some(FEE_TOKEN),
            flat_fee: 1_000,
            fee_percent: FIXED_POINT_ONE / 50, // 2%
            percent_tokens: BTreeSet::new(),
        }
    }

    #[test]
    fn no_wallet_means_no_fee() {
        let mut s = schedule();
        s.fee_wallet = None;
        assert_eq!(s.quote(&TOKEN, 100).unwrap(), FeeCharge::None);
    }

    #[test]
    fn flat_is_default_mode() {
        let s = schedule();
        let q = s.quote(&TOKEN, 5_000).unwrap();
        assert_eq!(q, FeeCharge::Flat { wallet: WALLET, token: FEE_TOKEN, amount: 1_000 });
        assert_eq!(q.net_of(5_000), 5_000);
    }

    #[test]
    fn toggle_switches_to_percent() {
        let mut s = schedule();
        assert_eq!(s.toggle_mode(TOKEN), FeeMode::Percent);
        let q = s.quote(&TOKEN, 5_000).unwrap();
        assert_eq!(q, FeeCharge::Percent { wallet: WALLET, amount: 100 });
        assert_eq!(q.net_of(5_000), 4_900);
        assert_eq!(s.toggle_mode(TOKEN), FeeMode::Flat);
    }

    #[test]
    fn fee_percent_capped_at_one() {
        let mut s = schedule();
        assert!(s.set_fee_percent(FIXED_POINT_ONE + 1).is_err());
        s.set_fee_percent(FIXED_POINT_ONE).unwrap();
        s.toggle_mode(TOKEN);
        assert!(matches!(s.quote(&TOKEN, 10), Err(LockError::InvalidParameters(_))));
    }
}
