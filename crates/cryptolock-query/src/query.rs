use cryptolock_core::criterion::{
    BurnCriterion, CriterionType, MarketCapCriterion, MultisigCriterion, PriceCriterion,
    TimeCriterion,
};
use cryptolock_core::error::LockError;
use cryptolock_core::lock::{CriterionRef, Lock, LockState};
use cryptolock_core::types::{Address, Amount, CriterionId, LockId, Timestamp};
use cryptolock_state::{LockEngine, PriceOracle, TokenLedger};
use serde::{Deserialize, Serialize};

/// One lock as external integrations list it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSummary {
    pub id: LockId,
    pub owner: Address,
    pub amount: Amount,
    pub token: Address,
    /// Expression in wire spelling.
    pub operations: Vec<String>,
    pub criterion_types: Vec<CriterionType>,
    pub criterion_ids: Vec<CriterionId>,
    pub active: bool,
}

impl From<&Lock> for LockSummary {
    fn from(lock: &Lock) -> Self {
        Self {
            id: lock.id,
            owner: lock.owner,
            amount: lock.amount,
            token: lock.token,
            operations: lock.symbols(),
            criterion_types: lock.criterion_types(),
            criterion_ids: lock.criterion_ids(),
            active: lock.is_active(),
        }
    }
}

/// Query helpers for locks and criteria.
pub struct LockQuery<'a, L, O> {
    engine: &'a LockEngine<L, O>,
}

impl<'a, L: TokenLedger, O: PriceOracle> LockQuery<'a, L, O> {
    pub fn new(engine: &'a LockEngine<L, O>) -> Self {
        Self { engine }
    }

    fn lock(&self, id: LockId) -> Result<Lock, LockError> {
        self.engine.db.get_lock(id)?.ok_or(LockError::LockNotFound(id))
    }

    /// Every lock created by `owner`, in id order.
    pub fn view_data(&self, owner: &Address) -> Result<Vec<LockSummary>, LockError> {
        self.engine
            .db
            .lock_ids_by_owner(owner)?
            .into_iter()
            .map(|id| self.lock(id).map(|l| LockSummary::from(&l)))
            .collect()
    }

    pub fn view_data_by_id(&self, id: LockId) -> Result<LockSummary, LockError> {
        Ok(LockSummary::from(&self.lock(id)?))
    }

    /// Full stored record, including consumption details.
    pub fn lock_record(&self, id: LockId) -> Result<Lock, LockError> {
        self.lock(id)
    }

    pub fn all_locks(&self) -> Result<Vec<LockSummary>, LockError> {
        Ok(self.engine.db.iter_locks()?.iter().map(LockSummary::from).collect())
    }

    pub fn view_time_data(&self, id: CriterionId) -> Result<TimeCriterion, LockError> {
        self.engine
            .db
            .get_time_criterion(id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::Time, id })
    }

    pub fn view_burn_data(&self, id: CriterionId) -> Result<BurnCriterion, LockError> {
        self.engine
            .db
            .get_burn_criterion(id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::Burn, id })
    }

    pub fn view_price_data(&self, id: CriterionId) -> Result<PriceCriterion, LockError> {
        self.engine
            .db
            .get_price_criterion(id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::Price, id })
    }

    pub fn view_market_cap_data(&self, id: CriterionId) -> Result<MarketCapCriterion, LockError> {
        self.engine
            .db
            .get_market_cap_criterion(id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::MarketCap, id })
    }

    pub fn view_multisig_data(&self, id: CriterionId) -> Result<MultisigCriterion, LockError> {
        self.engine
            .db
            .get_multisig_criterion(id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::Multisig, id })
    }

    pub fn check_unlock(&self, id: LockId, now: Timestamp) -> Result<bool, LockError> {
        self.engine.check_unlock(id, now)
    }

    fn describe_criterion(&self, r: &CriterionRef, now: Timestamp) -> Result<String, LockError> {
        let detail = match r.kind {
            CriterionType::Time => {
                let c = self.view_time_data(r.id)?;
                let secs_remaining = c.unlock_timestamp.saturating_sub(now);
                if secs_remaining > 0 {
                    format!("unlocks in {} days ({}s)", secs_remaining / 86_400, secs_remaining)
                } else {
                    format!("matured at {}", c.unlock_timestamp)
                }
            }
            CriterionType::Burn => {
                let c = self.view_burn_data(r.id)?;
                format!(
                    "burn to {} reaching {} (was {} at lock)",
                    c.burn_sink, c.target_ratio, c.ratio_at_lock
                )
            }
            CriterionType::Price => {
                let c = self.view_price_data(r.id)?;
                format!("price reaching {} (was {} at lock)", c.target_price, c.price_at_lock)
            }
            CriterionType::MarketCap => {
                let c = self.view_market_cap_data(r.id)?;
                format!(
                    "market cap reaching {} (was {} at lock)",
                    c.target_market_cap, c.market_cap_at_lock
                )
            }
            CriterionType::Multisig => {
                let c = self.view_multisig_data(r.id)?;
                format!("{}/{} signatures ({:?})", c.signed_count, c.threshold, c.status())
            }
        };
        Ok(format!("  {}#{}: {}", r.kind, r.id, detail))
    }

    /// Human-readable summary of a lock and each of its criteria.
    pub fn describe(&self, id: LockId, now: Timestamp) -> Result<String, LockError> {
        let lock = self.lock(id)?;

        let status_str = match &lock.state {
            LockState::Active => {
                if self.engine.check_unlock(id, now)? {
                    "Active — conditions met, ready to unlock".to_string()
                } else {
                    "Active — conditions not yet met".to_string()
                }
            }
            LockState::Consumed { consumed_at, recipient, paid, retained } => {
                if *retained > 0 {
                    format!(
                        "Consumed at {} — paid {} to {}, {} retained in custody",
                        consumed_at, paid, recipient, retained
                    )
                } else {
                    format!("Consumed at {} — paid {} to {}", consumed_at, paid, recipient)
                }
            }
        };

        let mut lines = vec![format!(
            "Lock {} | {} of {} | owner: {} | {} | {}",
            lock.id,
            lock.amount,
            lock.token,
            lock.owner,
            lock.render_policy(),
            status_str
        )];
        for r in &lock.criteria {
            lines.push(self.describe_criterion(r, now)?);
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptolock_core::constants::FIXED_POINT_ONE;
    use cryptolock_core::criterion::CriterionSpec;
    use cryptolock_core::lock::UnlockMode;
    use cryptolock_core::types::Hash32;
    use cryptolock_state::{EngineConfig, LocalLedger, LocalOracle, LockRequest, StateDb};
    use std::sync::Arc;

    const ONE: Amount = FIXED_POINT_ONE;
    const TOKEN: Address = Address([0x70; 20]);
    const OWNER: Address = Address([0x01; 20]);
    const OTHER: Address = Address([0x02; 20]);
    const NOW: Timestamp = 1_000_000;

    fn engine(name: &str) -> LockEngine<LocalLedger, LocalOracle> {
        let dir = std::env::temp_dir().join(format!("cryptolock_query_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).expect("open temp db"));
        let e = LockEngine::new(
            db.clone(),
            LocalLedger::new(db.clone()),
            LocalOracle::new(db),
            EngineConfig::default(),
        )
        .unwrap();
        let custody = e.custody_address();
        e.ledger().register_token(&TOKEN, "TKN", 18).unwrap();
        for who in [OWNER, OTHER] {
            e.ledger().mint(&TOKEN, &who, 100 * ONE).unwrap();
            e.ledger().approve(&TOKEN, &who, &custody, u128::MAX).unwrap();
        }
        e.oracle().set_price(&TOKEN, ONE).unwrap();
        e
    }

    fn grouped_request() -> LockRequest {
        LockRequest::new(
            TOKEN,
            10 * ONE,
            &["(", "c1", "a", "c2", ")", "o", "c3"],
            vec![
                CriterionSpec::Time { duration_secs: 86_400 * 2 }.encode(),
                CriterionSpec::Price { target_price: 2 * ONE }.encode(),
                CriterionSpec::Multisig {
                    threshold: 2,
                    announced_signers: vec![],
                    whitelist_root: Hash32([9u8; 32]),
                    listing_type: 0,
                }
                .encode(),
            ],
        )
    }

    #[test]
    fn view_data_lists_owner_locks() {
        let mut e = engine("view_data");
        e.create(&OWNER, &grouped_request(), NOW).unwrap();
        e.create(&OTHER, &grouped_request(), NOW).unwrap();
        e.create(&OWNER, &grouped_request(), NOW).unwrap();

        let q = LockQuery::new(&e);
        let mine = q.view_data(&OWNER).unwrap();
        assert_eq!(mine.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(mine[1].operations, vec!["(", "c1", "a", "c2", ")", "o", "c3"]);
        assert_eq!(
            mine[1].criterion_types,
            vec![CriterionType::Time, CriterionType::Price, CriterionType::Multisig]
        );
        assert_eq!(mine[1].criterion_ids, vec![6, 7, 8]);
        assert_eq!(q.all_locks().unwrap().len(), 3);
    }

    #[test]
    fn per_criterion_views() {
        let mut e = engine("criterion_views");
        e.create(&OWNER, &grouped_request(), NOW).unwrap();
        let q = LockQuery::new(&e);
        assert_eq!(q.view_time_data(0).unwrap().unlock_timestamp, NOW + 86_400 * 2);
        assert_eq!(q.view_price_data(1).unwrap().price_at_lock, ONE);
        assert_eq!(q.view_multisig_data(2).unwrap().threshold, 2);
        assert_eq!(
            q.view_burn_data(0),
            Err(LockError::CriterionNotFound { kind: CriterionType::Burn, id: 0 })
        );
        assert_eq!(q.view_data_by_id(5), Err(LockError::LockNotFound(5)));
    }

    #[test]
    fn describe_follows_lifecycle() {
        let mut e = engine("describe");
        let id = e.create(&OWNER, &grouped_request(), NOW).unwrap();
        {
            let text = LockQuery::new(&e).describe(id, NOW).unwrap();
            assert!(text.contains("( time#0 AND price#1 ) OR multisig#2"));
            assert!(text.contains("conditions not yet met"));
            assert!(text.contains("time#0: unlocks in 2 days"));
            assert!(text.contains("0/2 signatures"));
        }

        e.oracle().set_price(&TOKEN, 2 * ONE).unwrap();
        let later = NOW + 86_400 * 2;
        assert!(LockQuery::new(&e).check_unlock(id, later).unwrap());
        e.unlock_with(&OWNER, id, &OWNER, UnlockMode::Fraction { ratio: ONE / 2 }, later)
            .unwrap();

        let text = LockQuery::new(&e).describe(id, later).unwrap();
        assert!(text.contains("Consumed at"));
        assert!(text.contains("retained in custody"));
    }

    #[test]
    fn describe_tolerates_extreme_clock_values() {
        let mut e = engine("describe_extreme_now");
        let id = e.create(&OWNER, &grouped_request(), NOW).unwrap();
        let q = LockQuery::new(&e);
        assert!(q.describe(id, i64::MIN).unwrap().contains("time#0: unlocks in"));
        assert!(q.describe(id, i64::MAX).unwrap().contains("time#0: matured at"));
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut e = engine("summary_json");
        let id = e.create(&OWNER, &grouped_request(), NOW).unwrap();
        let summary = LockQuery::new(&e).view_data_by_id(id).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["owner"], OWNER.to_hex());
        assert_eq!(json["active"], true);
    }
}
