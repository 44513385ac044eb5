use cryptolock_core::constants::FIXED_POINT_ONE;
use cryptolock_core::criterion::{CriterionDescriptor, CriterionType, MultisigStatus};
use cryptolock_core::error::LockError;
use cryptolock_core::lock::{ExprToken, Lock, LockState, UnlockMode};
use cryptolock_core::math::mul_div;
use cryptolock_core::types::{Address, Amount, CriterionId, Hash32, LockId, Timestamp};
use cryptolock_policy::{bind_criteria, compile, evaluate, ExpressionLimits};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::criteria::{CriterionStores, StoredCriterion};
use crate::db::StateDb;
use crate::fee::{FeeCharge, FeeMode};
use crate::ledger::{PriceOracle, TokenLedger};
use crate::multisig::apply_signature;

// ── Lock request ──────────────────────────────────────────────────────────────

/// Arguments of a `create` call, in the shape external callers submit them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    pub token: Address,
    pub amount: Amount,
    /// Expression symbols, e.g. `["(", "c1", "a", "c2", ")", "o", "c3"]`.
    pub expression: Vec<String>,
    pub criterion_count: usize,
    pub placeholder_positions: Vec<usize>,
    /// One descriptor per placeholder, left to right.
    pub criteria: Vec<CriterionDescriptor>,
}

impl LockRequest {
    /// Build a request whose count and positions are read off `expression`.
    pub fn new<S: AsRef<str>>(
        token: Address,
        amount: Amount,
        expression: &[S],
        criteria: Vec<CriterionDescriptor>,
    ) -> Self {
        let placeholder_positions: Vec<usize> = expression
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                ExprToken::from_symbol(s.as_ref())
                    .map(|t| t.is_placeholder())
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();
        Self {
            token,
            amount,
            expression: expression.iter().map(|s| s.as_ref().to_string()).collect(),
            criterion_count: placeholder_positions.len(),
            placeholder_positions,
            criteria,
        }
    }
}

// ── Staged mutations ──────────────────────────────────────────────────────────

/// All state changes staged by `create` before commit.
#[derive(Default)]
struct StagedMutations {
    criteria: Vec<StoredCriterion>,
    lock: Option<Lock>,
    next_criterion_id: CriterionId,
    next_lock_id: LockId,
}

// ── LockEngine ────────────────────────────────────────────────────────────────

/// The lock ledger.
///
/// Takes custody of tokens on `create`, evaluates the lock's policy on
/// `unlock`/`check_unlock` and routes multisig signatures to their criterion.
/// Every mutating method takes `&mut self`, so operations are totally ordered
/// by whoever owns the engine.
pub struct LockEngine<L, O> {
    pub db: Arc<StateDb>,
    ledger: L,
    oracle: O,
    config: EngineConfig,
}

impl<L: TokenLedger, O: PriceOracle> LockEngine<L, O> {
    /// Build an engine with `config`, persisting it to the `meta` tree.
    pub fn new(db: Arc<StateDb>, ledger: L, oracle: O, config: EngineConfig) -> Result<Self, LockError> {
        config.validate()?;
        if let Some(stored) = db.get_config()? {
            // Locks do not record their custody address; existing locks are
            // paid out of whatever address the config names.
            if stored.custody_address != config.custody_address && db.next_lock_id()? > 0 {
                return Err(LockError::Config(
                    "custody address cannot change once locks exist".into(),
                ));
            }
        }
        db.put_config(&config)?;
        Ok(Self { db, ledger, oracle, config })
    }

    /// Build an engine with the configuration stored in `db`, or the default.
    pub fn open(db: Arc<StateDb>, ledger: L, oracle: O) -> Result<Self, LockError> {
        let config = match db.get_config()? {
            Some(c) => c,
            None => {
                debug!("no stored engine config; using defaults");
                EngineConfig::default()
            }
        };
        Self::new(db, ledger, oracle, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn custody_address(&self) -> Address {
        self.config.custody_address
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    fn stores(&self) -> CriterionStores<'_, L, O> {
        CriterionStores {
            db: &self.db,
            ledger: &self.ledger,
            oracle: &self.oracle,
            config: &self.config,
        }
    }

    fn load_lock(&self, lock_id: LockId) -> Result<Lock, LockError> {
        self.db.get_lock(lock_id)?.ok_or(LockError::LockNotFound(lock_id))
    }

    // ── Create ────────────────────────────────────────────────────────────────

    /// Lock `req.amount` of `req.token` from `caller` under the request's policy.
    ///
    /// All-or-nothing: a failure at any stage leaves no lock, no criterion rows
    /// and no custody movement behind.
    pub fn create(&mut self, caller: &Address, req: &LockRequest, now: Timestamp) -> Result<LockId, LockError> {
        if req.amount == 0 {
            return Err(LockError::ZeroAmount);
        }

        // ── Compile the expression ────────────────────────────────────────────
        let limits = ExpressionLimits { max_tokens: self.config.max_expression_tokens };
        let compiled = compile(
            req.expression.as_slice(),
            req.criterion_count,
            &req.placeholder_positions,
            req.criteria.len(),
            &limits,
        )?;

        // ── Prepare criteria (no writes yet) ──────────────────────────────────
        let mut staged = StagedMutations {
            next_criterion_id: self.db.next_criterion_id()?,
            next_lock_id: self.db.next_lock_id()?,
            ..Default::default()
        };
        let refs = {
            let stores = self.stores();
            bind_criteria(&compiled, &req.criteria, |desc| {
                let id = staged.next_criterion_id;
                let record = stores.prepare(id, desc, &req.token, now)?;
                staged.criteria.push(record);
                staged.next_criterion_id += 1;
                Ok(id)
            })?
        };

        let charge = self.config.fee.quote(&req.token, req.amount)?;

        // ── Custody intake ────────────────────────────────────────────────────
        let custody = self.config.custody_address;
        self.ledger
            .transfer_from(&req.token, &custody, caller, &custody, req.amount)
            .map_err(|e| LockError::CustodyTransferFailed(e.to_string()))?;

        if let Err(e) = self.charge_fee(caller, &req.token, &charge) {
            warn!(owner = %caller, token = %req.token, error = %e, "fee collection failed; refunding custody intake");
            self.refund(&req.token, caller, req.amount);
            return Err(LockError::CustodyTransferFailed(format!("fee collection: {}", e)));
        }

        let lock_id = staged.next_lock_id;
        staged.lock = Some(Lock {
            id: lock_id,
            owner: *caller,
            token: req.token,
            amount: charge.net_of(req.amount),
            fee_paid: charge.paid(),
            expression: compiled.tokens,
            criteria: refs,
            created_at: now,
            state: LockState::Active,
        });
        staged.next_lock_id += 1;

        // ── Commit ────────────────────────────────────────────────────────────
        if let Err(e) = self.commit(&staged) {
            warn!(owner = %caller, error = %e, "commit failed; refunding custody intake");
            self.reverse_fee(caller, &req.token, &charge);
            self.refund(&req.token, caller, charge.net_of(req.amount));
            return Err(e);
        }

        for c in &staged.criteria {
            debug!(lock_id, criterion_id = c.id(), kind = %c.kind(), "criterion appended");
        }
        info!(
            lock_id,
            owner = %caller,
            token = %req.token,
            amount = charge.net_of(req.amount),
            fee = charge.paid(),
            criteria = staged.criteria.len(),
            "lock created"
        );
        Ok(lock_id)
    }

    fn charge_fee(&mut self, caller: &Address, token: &Address, charge: &FeeCharge) -> Result<(), LockError> {
        let custody = self.config.custody_address;
        match charge {
            FeeCharge::None => Ok(()),
            FeeCharge::Percent { wallet, amount } => {
                self.ledger.transfer(token, &custody, wallet, *amount)
            }
            FeeCharge::Flat { wallet, token: fee_token, amount } => {
                self.ledger.transfer_from(fee_token, &custody, caller, wallet, *amount)
            }
        }
    }

    fn reverse_fee(&mut self, caller: &Address, token: &Address, charge: &FeeCharge) {
        let result = match charge {
            FeeCharge::None => Ok(()),
            FeeCharge::Percent { wallet, amount } => self.ledger.transfer(token, wallet, caller, *amount),
            FeeCharge::Flat { wallet, token: fee_token, amount } => {
                self.ledger.transfer(fee_token, wallet, caller, *amount)
            }
        };
        if let Err(e) = result {
            warn!(owner = %caller, error = %e, "fee reversal failed");
        }
    }

    fn refund(&mut self, token: &Address, to: &Address, amount: Amount) {
        let custody = self.config.custody_address;
        match self.ledger.transfer(token, &custody, to, amount) {
            Ok(()) => info!(to = %to, token = %token, amount, "custody intake refunded"),
            Err(e) => warn!(to = %to, token = %token, amount, error = %e, "custody refund failed"),
        }
    }

    fn commit(&self, staged: &StagedMutations) -> Result<(), LockError> {
        for c in &staged.criteria {
            c.persist(&self.db)?;
        }
        if let Some(lock) = &staged.lock {
            self.db.put_lock(lock)?;
        }
        self.db.set_next_criterion_id(staged.next_criterion_id)?;
        self.db.set_next_lock_id(staged.next_lock_id)?;
        self.db.flush()
    }

    // ── Evaluate ──────────────────────────────────────────────────────────────

    fn evaluate_lock(&self, lock: &Lock, now: Timestamp) -> Result<bool, LockError> {
        let stores = self.stores();
        evaluate(&lock.expression, &lock.criteria, |r| stores.is_satisfied(r, now))
    }

    /// Whether the lock's policy currently holds. Never mutates state, and
    /// keeps answering after the lock is consumed.
    pub fn check_unlock(&self, lock_id: LockId, now: Timestamp) -> Result<bool, LockError> {
        let lock = self.load_lock(lock_id)?;
        self.evaluate_lock(&lock, now)
    }

    // ── Unlock ────────────────────────────────────────────────────────────────

    /// Wire-shaped unlock: `(mode, data)` as submitted by external callers.
    pub fn unlock(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        recipient: &Address,
        mode: u8,
        data: &[u8],
        now: Timestamp,
    ) -> Result<Amount, LockError> {
        let mode = UnlockMode::decode(mode, data)?;
        self.unlock_with(caller, lock_id, recipient, mode, now)
    }

    /// Pay out `lock_id` to `recipient` if its policy holds. Returns the
    /// amount paid.
    pub fn unlock_with(
        &mut self,
        caller: &Address,
        lock_id: LockId,
        recipient: &Address,
        mode: UnlockMode,
        now: Timestamp,
    ) -> Result<Amount, LockError> {
        mode.validate()?;
        let mut lock = self.load_lock(lock_id)?;
        if lock.owner != *caller {
            return Err(LockError::NotLockOwner);
        }
        if !lock.is_active() {
            warn!(lock_id, "unlock rejected: lock already consumed");
            return Err(LockError::UnlockConditionsMismatch);
        }
        if !self.evaluate_lock(&lock, now)? {
            warn!(lock_id, "unlock rejected: policy not satisfied");
            return Err(LockError::UnlockConditionsMismatch);
        }

        let paid = match mode {
            UnlockMode::Full => lock.amount,
            UnlockMode::Fraction { ratio } => mul_div(lock.amount, ratio, FIXED_POINT_ONE)?,
        };
        let retained = lock.amount.checked_sub(paid).ok_or(LockError::ArithmeticOverflow)?;

        // Consumed is persisted before the payout; a failed payout puts the
        // active record back.
        let active = lock.clone();
        lock.state = LockState::Consumed { consumed_at: now, recipient: *recipient, paid, retained };
        self.db.put_lock(&lock)?;
        self.db.flush()?;

        if paid > 0 {
            let custody = self.config.custody_address;
            if let Err(e) = self.ledger.transfer(&lock.token, &custody, recipient, paid) {
                warn!(lock_id, error = %e, "payout failed; restoring active lock");
                if let Err(restore) = self.db.put_lock(&active).and_then(|()| self.db.flush()) {
                    warn!(lock_id, error = %restore, "failed to restore active lock");
                }
                return Err(LockError::CustodyTransferFailed(e.to_string()));
            }
        }

        info!(lock_id, recipient = %recipient, paid, retained, "lock unlocked");
        Ok(paid)
    }

    // ── Multisig ──────────────────────────────────────────────────────────────

    /// Record `signer`'s approval on a multisig criterion.
    pub fn sign(
        &mut self,
        signer: &Address,
        criterion_id: CriterionId,
        proof: &[Hash32],
    ) -> Result<MultisigStatus, LockError> {
        let mut criterion = self
            .db
            .get_multisig_criterion(criterion_id)?
            .ok_or(LockError::CriterionNotFound { kind: CriterionType::Multisig, id: criterion_id })?;

        let status = match apply_signature(&mut criterion, signer, proof, self.config.max_proof_depth) {
            Ok(s) => s,
            Err(e) => {
                debug!(criterion_id, signer = %signer, error = %e, "signature rejected");
                return Err(e);
            }
        };
        self.db.put_multisig_criterion(&criterion)?;
        self.db.flush()?;

        info!(
            criterion_id,
            signer = %signer,
            signed = criterion.signed_count,
            threshold = criterion.threshold,
            "signature accepted"
        );
        Ok(status)
    }

    // ── Treasury & burn sinks ─────────────────────────────────────────────────

    fn update_config<F>(&mut self, change: F) -> Result<(), LockError>
    where
        F: FnOnce(&mut EngineConfig) -> Result<(), LockError>,
    {
        let mut next = self.config.clone();
        change(&mut next)?;
        next.validate()?;
        self.db.put_config(&next)?;
        self.config = next;
        Ok(())
    }

    pub fn set_fee_wallet(&mut self, wallet: Option<Address>) -> Result<(), LockError> {
        self.update_config(|c| {
            c.fee.fee_wallet = wallet;
            Ok(())
        })?;
        info!(wallet = ?wallet, "fee wallet set");
        Ok(())
    }

    pub fn set_fee_token(&mut self, token: Option<Address>) -> Result<(), LockError> {
        self.update_config(|c| {
            c.fee.fee_token = token;
            Ok(())
        })?;
        info!(token = ?token, "fee token set");
        Ok(())
    }

    pub fn set_fee_amount(&mut self, amount: Amount) -> Result<(), LockError> {
        self.update_config(|c| {
            c.fee.flat_fee = amount;
            Ok(())
        })?;
        info!(amount, "flat fee set");
        Ok(())
    }

    pub fn set_fee_percent(&mut self, percent: Amount) -> Result<(), LockError> {
        self.update_config(|c| c.fee.set_fee_percent(percent))?;
        info!(percent, "fee percent set");
        Ok(())
    }

    /// Flip `token` between flat and percent fees. Returns the new mode.
    pub fn toggle_fee_type(&mut self, token: &Address) -> Result<FeeMode, LockError> {
        let mut mode = FeeMode::Flat;
        self.update_config(|c| {
            mode = c.fee.toggle_mode(*token);
            Ok(())
        })?;
        info!(token = %token, mode = ?mode, "fee type toggled");
        Ok(mode)
    }

    /// Flip whether `sink` is accepted by burn criteria. Returns `true` when
    /// it is now authorised.
    pub fn toggle_burn_authorise(&mut self, sink: &Address) -> Result<bool, LockError> {
        let mut authorised = false;
        self.update_config(|c| {
            authorised = if c.burn_sinks.remove(sink) {
                false
            } else {
                c.burn_sinks.insert(*sink)
            };
            Ok(())
        })?;
        info!(sink = %sink, authorised, "burn sink toggled");
        Ok(authorised)
    }

    pub fn fee_wallet(&self) -> Option<Address> {
        self.config.fee.fee_wallet
    }

    pub fn fee_token(&self) -> Option<Address> {
        self.config.fee.fee_token
    }

    pub fn fee_amount(&self) -> Amount {
        self.config.fee.flat_fee
    }

    pub fn fee_percent(&self) -> Amount {
        self.config.fee.fee_percent
    }

    pub fn fee_type(&self, token: &Address) -> FeeMode {
        self.config.fee.mode_for(token)
    }

    pub fn is_burn_authorised(&self, sink: &Address) -> bool {
        self.config.burn_sinks.contains(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LocalLedger, LocalOracle};
    use cryptolock_core::constants::DEAD_ADDRESS;
    use cryptolock_core::criterion::CriterionSpec;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("cryptolock_engine_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    const ONE: Amount = FIXED_POINT_ONE;
    const TOKEN: Address = Address([0x70; 20]);
    const FEE_TOKEN: Address = Address([0x71; 20]);
    const OWNER: Address = Address([0x01; 20]);
    const OTHER: Address = Address([0x02; 20]);
    const WALLET: Address = Address([0x03; 20]);
    const NOW: Timestamp = 1_700_000_000;

    fn engine(name: &str) -> LockEngine<LocalLedger, LocalOracle> {
        let db = Arc::new(temp_db(name));
        let ledger = LocalLedger::new(db.clone());
        let oracle = LocalOracle::new(db.clone());
        let engine = LockEngine::new(db, ledger, oracle, EngineConfig::default()).unwrap();
        let custody = engine.custody_address();
        for t in [TOKEN, FEE_TOKEN] {
            engine.ledger().register_token(&t, "TKN", 18).unwrap();
            engine.ledger().mint(&t, &OWNER, 1_000 * ONE).unwrap();
            engine.ledger().approve(&t, &OWNER, &custody, u128::MAX).unwrap();
        }
        engine.oracle().set_price(&TOKEN, ONE).unwrap();
        engine
    }

    fn time(secs: u64) -> CriterionDescriptor {
        CriterionSpec::Time { duration_secs: secs }.encode()
    }

    fn balance(e: &LockEngine<LocalLedger, LocalOracle>, token: &Address, who: &Address) -> Amount {
        e.ledger().balance_of(token, who).unwrap()
    }

    // ── Create ────────────────────────────────────────────────────────────────

    #[test]
    fn create_takes_custody_and_assigns_sequential_ids() {
        let mut e = engine("create_ids");
        let req = LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(60)]);
        assert_eq!(e.create(&OWNER, &req, NOW).unwrap(), 0);
        assert_eq!(e.create(&OWNER, &req, NOW).unwrap(), 1);
        assert_eq!(balance(&e, &TOKEN, &e.custody_address()), 200 * ONE);

        let lock = e.db.get_lock(1).unwrap().unwrap();
        assert_eq!(lock.amount, 100 * ONE);
        assert_eq!(lock.criteria[0].id, 1);
        assert!(lock.is_active());
    }

    #[test]
    fn zero_amount_rejected() {
        let mut e = engine("zero_amount");
        let req = LockRequest::new(TOKEN, 0, &["c1"], vec![time(60)]);
        assert_eq!(e.create(&OWNER, &req, NOW), Err(LockError::ZeroAmount));
    }

    #[test]
    fn failed_criterion_leaves_no_trace() {
        let mut e = engine("all_or_nothing");
        let bad_burn = CriterionSpec::Burn { sink: DEAD_ADDRESS, target_ratio: 0 }.encode();
        let req = LockRequest::new(TOKEN, 10 * ONE, &["c1", "a", "c2"], vec![time(60), bad_burn]);
        assert!(matches!(e.create(&OWNER, &req, NOW), Err(LockError::InvalidParameters(_))));

        assert_eq!(e.db.next_lock_id().unwrap(), 0);
        assert_eq!(e.db.next_criterion_id().unwrap(), 0);
        assert!(e.db.get_time_criterion(0).unwrap().is_none());
        assert_eq!(balance(&e, &TOKEN, &OWNER), 1_000 * ONE);
    }

    #[test]
    fn missing_allowance_is_custody_failure() {
        let mut e = engine("no_allowance");
        let custody = e.custody_address();
        e.ledger().approve(&TOKEN, &OWNER, &custody, 0).unwrap();
        let req = LockRequest::new(TOKEN, ONE, &["c1"], vec![time(60)]);
        assert!(matches!(e.create(&OWNER, &req, NOW), Err(LockError::CustodyTransferFailed(_))));
        assert_eq!(e.db.next_lock_id().unwrap(), 0);
    }

    // ── Fees ──────────────────────────────────────────────────────────────────

    #[test]
    fn percent_fee_reduces_locked_amount() {
        let mut e = engine("fee_percent");
        e.set_fee_wallet(Some(WALLET)).unwrap();
        e.set_fee_percent(ONE / 50).unwrap();
        assert_eq!(e.toggle_fee_type(&TOKEN).unwrap(), FeeMode::Percent);

        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        let lock = e.db.get_lock(id).unwrap().unwrap();
        assert_eq!(lock.amount, 98 * ONE);
        assert_eq!(lock.fee_paid, 2 * ONE);
        assert_eq!(balance(&e, &TOKEN, &WALLET), 2 * ONE);
        assert_eq!(balance(&e, &TOKEN, &e.custody_address()), 98 * ONE);
    }

    #[test]
    fn flat_fee_pulls_fee_token_from_owner() {
        let mut e = engine("fee_flat");
        e.set_fee_wallet(Some(WALLET)).unwrap();
        e.set_fee_token(Some(FEE_TOKEN)).unwrap();
        e.set_fee_amount(ONE).unwrap();

        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert_eq!(e.db.get_lock(id).unwrap().unwrap().amount, 100 * ONE);
        assert_eq!(balance(&e, &FEE_TOKEN, &WALLET), ONE);
        assert_eq!(balance(&e, &FEE_TOKEN, &OWNER), 999 * ONE);
    }

    #[test]
    fn fee_failure_refunds_intake() {
        let mut e = engine("fee_refund");
        e.set_fee_wallet(Some(WALLET)).unwrap();
        e.set_fee_token(Some(FEE_TOKEN)).unwrap();
        e.set_fee_amount(5_000 * ONE).unwrap();

        let req = LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]);
        assert!(matches!(e.create(&OWNER, &req, NOW), Err(LockError::CustodyTransferFailed(_))));
        assert_eq!(balance(&e, &TOKEN, &OWNER), 1_000 * ONE);
        assert_eq!(balance(&e, &TOKEN, &e.custody_address()), 0);
        assert!(e.db.get_lock(0).unwrap().is_none());
    }

    #[test]
    fn settings_survive_reopen() {
        let mut e = engine("settings_reopen");
        e.set_fee_wallet(Some(WALLET)).unwrap();
        assert!(e.toggle_burn_authorise(&OTHER).unwrap());
        assert!(!e.toggle_burn_authorise(&DEAD_ADDRESS).unwrap());

        let db = e.db.clone();
        let reopened = LockEngine::open(db.clone(), LocalLedger::new(db.clone()), LocalOracle::new(db)).unwrap();
        assert_eq!(reopened.fee_wallet(), Some(WALLET));
        assert!(reopened.is_burn_authorised(&OTHER));
        assert!(!reopened.is_burn_authorised(&DEAD_ADDRESS));
    }

    #[test]
    fn fee_wallet_cannot_be_custody() {
        let mut e = engine("fee_wallet_custody");
        let custody = e.custody_address();
        assert!(matches!(e.set_fee_wallet(Some(custody)), Err(LockError::Config(_))));
        assert_eq!(e.fee_wallet(), None);
    }

    // ── Unlock ────────────────────────────────────────────────────────────────

    #[test]
    fn only_owner_may_unlock() {
        let mut e = engine("owner_only");
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert_eq!(
            e.unlock_with(&OTHER, id, &OTHER, UnlockMode::Full, NOW + 10),
            Err(LockError::NotLockOwner)
        );
        assert_eq!(
            e.unlock_with(&OWNER, 99, &OWNER, UnlockMode::Full, NOW + 10),
            Err(LockError::LockNotFound(99))
        );
    }

    #[test]
    fn fractional_unlock_retains_remainder() {
        let mut e = engine("fraction");
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        let paid = e
            .unlock_with(&OWNER, id, &OTHER, UnlockMode::Fraction { ratio: ONE / 4 }, NOW + 1)
            .unwrap();
        assert_eq!(paid, 25 * ONE);
        assert_eq!(balance(&e, &TOKEN, &OTHER), 25 * ONE);
        match e.db.get_lock(id).unwrap().unwrap().state {
            LockState::Consumed { paid, retained, recipient, consumed_at } => {
                assert_eq!(paid, 25 * ONE);
                assert_eq!(retained, 75 * ONE);
                assert_eq!(recipient, OTHER);
                assert_eq!(consumed_at, NOW + 1);
            }
            LockState::Active => panic!("lock should be consumed"),
        }
    }

    #[test]
    fn out_of_range_fraction_leaves_lock_active() {
        let mut e = engine("fraction_range");
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        let over = UnlockMode::Fraction { ratio: ONE + 1 };
        assert!(matches!(
            e.unlock_with(&OWNER, id, &OWNER, over, NOW + 1),
            Err(LockError::InvalidParameters(_))
        ));
        assert!(e.db.get_lock(id).unwrap().unwrap().is_active());
    }

    /// Ledger that notes whether lock 0 was still active at each payout.
    struct PayoutWatcher {
        inner: LocalLedger,
        db: Arc<StateDb>,
        active_at_payout: Vec<bool>,
        fail_payouts: bool,
    }

    impl TokenLedger for PayoutWatcher {
        fn transfer_from(
            &mut self,
            token: &Address,
            spender: &Address,
            owner: &Address,
            to: &Address,
            amount: Amount,
        ) -> Result<(), LockError> {
            self.inner.transfer_from(token, spender, owner, to, amount)
        }

        fn transfer(
            &mut self,
            token: &Address,
            from: &Address,
            to: &Address,
            amount: Amount,
        ) -> Result<(), LockError> {
            let lock = self.db.get_lock(0)?.ok_or(LockError::LockNotFound(0))?;
            self.active_at_payout.push(lock.is_active());
            if self.fail_payouts {
                return Err(LockError::InsufficientBalance { need: amount, have: 0 });
            }
            self.inner.transfer(token, from, to, amount)
        }

        fn balance_of(&self, token: &Address, holder: &Address) -> Result<Amount, LockError> {
            self.inner.balance_of(token, holder)
        }

        fn total_supply(&self, token: &Address) -> Result<Amount, LockError> {
            self.inner.total_supply(token)
        }

        fn decimals(&self, token: &Address) -> Result<u8, LockError> {
            self.inner.decimals(token)
        }
    }

    fn watched_engine(name: &str, fail_payouts: bool) -> LockEngine<PayoutWatcher, LocalOracle> {
        let db = Arc::new(temp_db(name));
        let inner = LocalLedger::new(db.clone());
        let custody = EngineConfig::default().custody_address;
        inner.register_token(&TOKEN, "TKN", 18).unwrap();
        inner.mint(&TOKEN, &OWNER, 1_000 * ONE).unwrap();
        inner.approve(&TOKEN, &OWNER, &custody, u128::MAX).unwrap();
        let ledger = PayoutWatcher { inner, db: db.clone(), active_at_payout: vec![], fail_payouts };
        let oracle = LocalOracle::new(db.clone());
        LockEngine::new(db, ledger, oracle, EngineConfig::default()).unwrap()
    }

    #[test]
    fn lock_is_consumed_before_payout() {
        let mut e = watched_engine("consumed_before_payout", false);
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert_eq!(e.unlock_with(&OWNER, id, &OWNER, UnlockMode::Full, NOW + 1).unwrap(), 100 * ONE);
        assert_eq!(e.ledger().active_at_payout, vec![false]);
        assert!(!e.db.get_lock(id).unwrap().unwrap().is_active());
    }

    #[test]
    fn failed_payout_restores_active_lock() {
        let mut e = watched_engine("payout_failure", true);
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert!(matches!(
            e.unlock_with(&OWNER, id, &OWNER, UnlockMode::Full, NOW + 1),
            Err(LockError::CustodyTransferFailed(_))
        ));
        assert!(e.db.get_lock(id).unwrap().unwrap().is_active());
        assert_eq!(e.ledger().balance_of(&TOKEN, &e.custody_address()).unwrap(), 100 * ONE);

        e.ledger_mut().fail_payouts = false;
        assert_eq!(e.unlock_with(&OWNER, id, &OWNER, UnlockMode::Full, NOW + 1).unwrap(), 100 * ONE);
        assert_eq!(e.ledger().balance_of(&TOKEN, &OWNER).unwrap(), 1_000 * ONE);
    }

    #[test]
    fn custody_is_fixed_once_locks_exist() {
        let mut e = engine("custody_fixed");
        let moved = EngineConfig { custody_address: Address([0x99; 20]), ..EngineConfig::default() };

        let db = e.db.clone();
        let early = LockEngine::new(db.clone(), LocalLedger::new(db.clone()), LocalOracle::new(db.clone()), moved.clone());
        assert!(early.is_ok());
        let back = LockEngine::new(db.clone(), LocalLedger::new(db.clone()), LocalOracle::new(db.clone()), EngineConfig::default());
        assert!(back.is_ok());

        let id = e.create(&OWNER, &LockRequest::new(TOKEN, 100 * ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        let late = LockEngine::new(db.clone(), LocalLedger::new(db.clone()), LocalOracle::new(db.clone()), moved);
        assert!(matches!(late, Err(LockError::Config(_))));

        let reopened = LockEngine::open(db.clone(), LocalLedger::new(db.clone()), LocalOracle::new(db));
        let mut reopened = reopened.unwrap();
        assert_eq!(reopened.custody_address(), e.custody_address());
        assert_eq!(reopened.unlock_with(&OWNER, id, &OWNER, UnlockMode::Full, NOW + 1).unwrap(), 100 * ONE);
    }

    #[test]
    fn unsupported_mode_rejected() {
        let mut e = engine("bad_mode");
        let id = e.create(&OWNER, &LockRequest::new(TOKEN, ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert_eq!(
            e.unlock(&OWNER, id, &OWNER, 9, &[], NOW + 1),
            Err(LockError::UnsupportedUnlockMode(9))
        );
    }

    // ── Multisig ──────────────────────────────────────────────────────────────

    #[test]
    fn sign_on_non_multisig_criterion_is_not_found() {
        let mut e = engine("sign_missing");
        e.create(&OWNER, &LockRequest::new(TOKEN, ONE, &["c1"], vec![time(1)]), NOW).unwrap();
        assert_eq!(
            e.sign(&OWNER, 0, &[]),
            Err(LockError::CriterionNotFound { kind: CriterionType::Multisig, id: 0 })
        );
    }
}
