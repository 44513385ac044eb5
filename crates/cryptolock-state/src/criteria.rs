//! The five criterion stores.
//!
//! Construction is split in two: `CriterionStores::prepare` validates a
//! descriptor against live ledger and oracle state and returns a record
//! without touching the database; `StoredCriterion::persist` writes it. The
//! engine prepares every criterion of a lock before persisting any, so a
//! rejected lock leaves no rows behind.

use cryptolock_core::constants::FIXED_POINT_ONE;
use cryptolock_core::criterion::{
    BurnCriterion, CriterionDescriptor, CriterionSpec, CriterionType, MarketCapCriterion,
    MultisigCriterion, PriceCriterion, TimeCriterion,
};
use cryptolock_core::error::LockError;
use cryptolock_core::lock::CriterionRef;
use cryptolock_core::math::{market_cap, ratio};
use cryptolock_core::types::{Address, Amount, CriterionId, Timestamp};
use std::collections::BTreeSet;

use crate::config::EngineConfig;
use crate::db::StateDb;
use crate::ledger::{PriceOracle, TokenLedger};

/// A validated criterion record awaiting commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredCriterion {
    Time(TimeCriterion),
    Burn(BurnCriterion),
    Price(PriceCriterion),
    MarketCap(MarketCapCriterion),
    Multisig(MultisigCriterion),
}

impl StoredCriterion {
    pub fn id(&self) -> CriterionId {
        match self {
            StoredCriterion::Time(c) => c.id,
            StoredCriterion::Burn(c) => c.id,
            StoredCriterion::Price(c) => c.id,
            StoredCriterion::MarketCap(c) => c.id,
            StoredCriterion::Multisig(c) => c.id,
        }
    }

    pub fn kind(&self) -> CriterionType {
        match self {
            StoredCriterion::Time(_) => CriterionType::Time,
            StoredCriterion::Burn(_) => CriterionType::Burn,
            StoredCriterion::Price(_) => CriterionType::Price,
            StoredCriterion::MarketCap(_) => CriterionType::MarketCap,
            StoredCriterion::Multisig(_) => CriterionType::Multisig,
        }
    }

    pub fn persist(&self, db: &StateDb) -> Result<(), LockError> {
        match self {
            StoredCriterion::Time(c) => db.put_time_criterion(c),
            StoredCriterion::Burn(c) => db.put_burn_criterion(c),
            StoredCriterion::Price(c) => db.put_price_criterion(c),
            StoredCriterion::MarketCap(c) => db.put_market_cap_criterion(c),
            StoredCriterion::Multisig(c) => db.put_multisig_criterion(c),
        }
    }
}

fn invalid(msg: &str) -> LockError {
    LockError::InvalidParameters(msg.to_string())
}

/// Current `balance(sink) / supply` of `token`, 1e18 scale. Zero supply reads as zero.
pub fn burn_ratio<L: TokenLedger>(ledger: &L, token: &Address, sink: &Address) -> Result<Amount, LockError> {
    let supply = ledger.total_supply(token)?;
    let burned = ledger.balance_of(token, sink)?;
    Ok(ratio(burned, supply).unwrap_or(0))
}

/// `total_supply × price / 10^decimals` of `token` at the oracle's current price.
pub fn current_market_cap<L: TokenLedger, O: PriceOracle>(
    ledger: &L,
    oracle: &O,
    token: &Address,
) -> Result<Amount, LockError> {
    let supply = ledger.total_supply(token)?;
    let price = oracle.fetch_price(token)?;
    let decimals = ledger.decimals(token)?;
    market_cap(supply, price, decimals)
}

/// Read access to every criterion store plus the collaborators their
/// predicates consult.
pub struct CriterionStores<'a, L, O> {
    pub db: &'a StateDb,
    pub ledger: &'a L,
    pub oracle: &'a O,
    pub config: &'a EngineConfig,
}

impl<'a, L: TokenLedger, O: PriceOracle> CriterionStores<'a, L, O> {
    /// Validate `desc` for a lock on `token` created at `now`, and build the
    /// record that `id` will hold.
    pub fn prepare(
        &self,
        id: CriterionId,
        desc: &CriterionDescriptor,
        token: &Address,
        now: Timestamp,
    ) -> Result<StoredCriterion, LockError> {
        match desc.decode()? {
            CriterionSpec::Time { duration_secs } => {
                if duration_secs == 0 {
                    return Err(invalid("lock duration must be greater than zero"));
                }
                let duration = i64::try_from(duration_secs)
                    .map_err(|_| invalid("lock duration out of range"))?;
                let unlock_timestamp = now
                    .checked_add(duration)
                    .ok_or_else(|| invalid("lock duration out of range"))?;
                Ok(StoredCriterion::Time(TimeCriterion {
                    id,
                    lock_timestamp: now,
                    unlock_timestamp,
                }))
            }

            CriterionSpec::Burn { sink, target_ratio } => {
                if !self.config.burn_sinks.contains(&sink) {
                    return Err(invalid("burn address is not authorised"));
                }
                if target_ratio == 0 || target_ratio > FIXED_POINT_ONE {
                    return Err(invalid("burn percentage must be in (0, 1e18]"));
                }
                let current = burn_ratio(self.ledger, token, &sink)?;
                if target_ratio <= current {
                    return Err(invalid(
                        "given burn percentage is less than current burn percentage",
                    ));
                }
                Ok(StoredCriterion::Burn(BurnCriterion {
                    id,
                    token: *token,
                    burn_sink: sink,
                    target_ratio,
                    ratio_at_lock: current,
                }))
            }

            CriterionSpec::Price { target_price } => {
                if target_price == 0 {
                    return Err(invalid("target price must be greater than zero"));
                }
                let price_at_lock = self.oracle.fetch_price(token)?;
                Ok(StoredCriterion::Price(PriceCriterion {
                    id,
                    token: *token,
                    price_at_lock,
                    target_price,
                }))
            }

            CriterionSpec::MarketCap { target_market_cap } => {
                if target_market_cap == 0 {
                    return Err(invalid("target market cap must be greater than zero"));
                }
                let market_cap_at_lock = current_market_cap(self.ledger, self.oracle, token)?;
                Ok(StoredCriterion::MarketCap(MarketCapCriterion {
                    id,
                    token: *token,
                    market_cap_at_lock,
                    target_market_cap,
                }))
            }

            CriterionSpec::Multisig { threshold, announced_signers, whitelist_root, listing_type } => {
                if threshold == 0 {
                    return Err(invalid("multisig threshold must be at least 1"));
                }
                if whitelist_root.is_zero() {
                    return Err(invalid("whitelist root must not be zero"));
                }
                Ok(StoredCriterion::Multisig(MultisigCriterion {
                    id,
                    threshold,
                    whitelist_root,
                    announced_signers,
                    listing_type,
                    signed: BTreeSet::new(),
                    signed_count: 0,
                }))
            }
        }
    }

    /// Whether the criterion behind `r` holds at `now`. Read-only.
    pub fn is_satisfied(&self, r: &CriterionRef, now: Timestamp) -> Result<bool, LockError> {
        let missing = || LockError::CriterionNotFound { kind: r.kind, id: r.id };
        match r.kind {
            CriterionType::Time => {
                let c = self.db.get_time_criterion(r.id)?.ok_or_else(missing)?;
                Ok(c.is_satisfied(now))
            }
            CriterionType::Burn => {
                let c = self.db.get_burn_criterion(r.id)?.ok_or_else(missing)?;
                Ok(burn_ratio(self.ledger, &c.token, &c.burn_sink)? >= c.target_ratio)
            }
            CriterionType::Price => {
                let c = self.db.get_price_criterion(r.id)?.ok_or_else(missing)?;
                Ok(self.oracle.fetch_price(&c.token)? >= c.target_price)
            }
            CriterionType::MarketCap => {
                let c = self.db.get_market_cap_criterion(r.id)?.ok_or_else(missing)?;
                Ok(current_market_cap(self.ledger, self.oracle, &c.token)? >= c.target_market_cap)
            }
            CriterionType::Multisig => {
                let c = self.db.get_multisig_criterion(r.id)?.ok_or_else(missing)?;
                Ok(c.is_satisfied())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LocalLedger, LocalOracle};
    use cryptolock_core::constants::DEAD_ADDRESS;
    use cryptolock_core::types::Hash32;
    use std::sync::Arc;

    fn temp_db(name: &str) -> Arc<StateDb> {
        let dir = std::env::temp_dir().join(format!("cryptolock_criteria_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(StateDb::open(&dir).expect("open temp db"))
    }

    const TOKEN: Address = Address([1u8; 20]);
    const HOLDER: Address = Address([2u8; 20]);
    const ONE: Amount = FIXED_POINT_ONE;

    struct Fixture {
        db: Arc<StateDb>,
        ledger: LocalLedger,
        oracle: LocalOracle,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let db = temp_db(name);
            let ledger = LocalLedger::new(db.clone());
            ledger.register_token(&TOKEN, "TKN", 18).unwrap();
            ledger.mint(&TOKEN, &HOLDER, 1_000 * ONE).unwrap();
            let oracle = LocalOracle::new(db.clone());
            oracle.set_price(&TOKEN, 2 * ONE).unwrap();
            Self { db, ledger, oracle, config: EngineConfig::default() }
        }

        fn stores(&self) -> CriterionStores<'_, LocalLedger, LocalOracle> {
            CriterionStores { db: &self.db, ledger: &self.ledger, oracle: &self.oracle, config: &self.config }
        }

        fn make(&self, id: CriterionId, spec: CriterionSpec, now: Timestamp) -> Result<CriterionRef, LockError> {
            let stored = self.stores().prepare(id, &spec.encode(), &TOKEN, now)?;
            stored.persist(&self.db)?;
            Ok(CriterionRef { position: 0, kind: stored.kind(), id })
        }
    }

    #[test]
    fn time_turns_true_at_unlock_timestamp() {
        let f = Fixture::new("time");
        let r = f.make(0, CriterionSpec::Time { duration_secs: 86_400 }, 1_000).unwrap();
        let s = f.stores();
        assert!(!s.is_satisfied(&r, 1_000).unwrap());
        assert!(!s.is_satisfied(&r, 87_399).unwrap());
        assert!(s.is_satisfied(&r, 87_400).unwrap());
        assert!(s.is_satisfied(&r, 10_000_000).unwrap());
    }

    #[test]
    fn zero_duration_rejected() {
        let f = Fixture::new("time_zero");
        assert!(matches!(
            f.make(0, CriterionSpec::Time { duration_secs: 0 }, 0),
            Err(LockError::InvalidParameters(_))
        ));
    }

    #[test]
    fn burn_target_must_exceed_current_ratio() {
        let mut f = Fixture::new("burn");
        // 10% of supply already burned.
        f.ledger.transfer(&TOKEN, &HOLDER, &DEAD_ADDRESS, 100 * ONE).unwrap();

        let err = f
            .make(0, CriterionSpec::Burn { sink: DEAD_ADDRESS, target_ratio: ONE / 10 }, 0)
            .unwrap_err();
        assert_eq!(err.to_string(), "given burn percentage is less than current burn percentage");

        let r = f
            .make(1, CriterionSpec::Burn { sink: DEAD_ADDRESS, target_ratio: ONE / 5 }, 0)
            .unwrap();
        assert!(!f.stores().is_satisfied(&r, 0).unwrap());
        f.ledger.transfer(&TOKEN, &HOLDER, &DEAD_ADDRESS, 100 * ONE).unwrap();
        assert!(f.stores().is_satisfied(&r, 0).unwrap());
        assert_eq!(f.db.get_burn_criterion(1).unwrap().unwrap().ratio_at_lock, ONE / 10);
    }

    #[test]
    fn burn_sink_must_be_authorised() {
        let f = Fixture::new("burn_sink");
        let err = f
            .make(0, CriterionSpec::Burn { sink: Address([0xAA; 20]), target_ratio: ONE / 2 }, 0)
            .unwrap_err();
        assert_eq!(err, LockError::InvalidParameters("burn address is not authorised".into()));
    }

    #[test]
    fn price_compares_against_oracle() {
        let f = Fixture::new("price");
        let r = f.make(0, CriterionSpec::Price { target_price: 3 * ONE }, 0).unwrap();
        assert_eq!(f.db.get_price_criterion(0).unwrap().unwrap().price_at_lock, 2 * ONE);
        assert!(!f.stores().is_satisfied(&r, 0).unwrap());
        f.oracle.set_price(&TOKEN, 3 * ONE).unwrap();
        assert!(f.stores().is_satisfied(&r, 0).unwrap());
    }

    #[test]
    fn market_cap_scales_by_token_unit() {
        let f = Fixture::new("marketcap");
        // 1000 tokens × 2.0 = 2000.0
        let r = f
            .make(0, CriterionSpec::MarketCap { target_market_cap: 3_000 * ONE }, 0)
            .unwrap();
        assert_eq!(
            f.db.get_market_cap_criterion(0).unwrap().unwrap().market_cap_at_lock,
            2_000 * ONE
        );
        assert!(!f.stores().is_satisfied(&r, 0).unwrap());
        f.oracle.set_price(&TOKEN, 3 * ONE).unwrap();
        assert!(f.stores().is_satisfied(&r, 0).unwrap());
    }

    #[test]
    fn multisig_construction_checks() {
        let f = Fixture::new("multisig");
        let spec = |threshold, root| CriterionSpec::Multisig {
            threshold,
            announced_signers: vec![],
            whitelist_root: root,
            listing_type: 0,
        };
        assert!(f.make(0, spec(0, Hash32([1u8; 32])), 0).is_err());
        assert!(f.make(0, spec(1, Hash32::ZERO), 0).is_err());
        let r = f.make(0, spec(2, Hash32([1u8; 32])), 0).unwrap();
        assert!(!f.stores().is_satisfied(&r, 0).unwrap());
    }

    #[test]
    fn unknown_criterion_is_reported() {
        let f = Fixture::new("missing");
        let r = CriterionRef { position: 0, kind: CriterionType::Price, id: 99 };
        assert_eq!(
            f.stores().is_satisfied(&r, 0).unwrap_err(),
            LockError::CriterionNotFound { kind: CriterionType::Price, id: 99 }
        );
    }
}
