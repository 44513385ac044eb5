use cryptolock_core::criterion::{
    BurnCriterion, MarketCapCriterion, MultisigCriterion, PriceCriterion, TimeCriterion,
};
use cryptolock_core::error::LockError;
use cryptolock_core::lock::Lock;
use cryptolock_core::types::{Address, Amount, CriterionId, LockId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::config::EngineConfig;
use crate::ledger::TokenInfo;

const META_NEXT_LOCK_ID: &str = "next_lock_id";
const META_NEXT_CRITERION_ID: &str = "next_criterion_id";
const META_ENGINE_CONFIG: &str = "engine_config";

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   locks               : LockId BE          → bincode(Lock)
///   owner_locks         : owner ‖ LockId BE  → [] (index)
///   time_criteria       : CriterionId BE     → bincode(TimeCriterion)
///   burn_criteria       : CriterionId BE     → bincode(BurnCriterion)
///   price_criteria      : CriterionId BE     → bincode(PriceCriterion)
///   marketcap_criteria  : CriterionId BE     → bincode(MarketCapCriterion)
///   multisig_criteria   : CriterionId BE     → bincode(MultisigCriterion)
///   meta                : utf8 key bytes     → raw bytes
///   balances            : token ‖ holder     → u128 BE
///   allowances          : token ‖ owner ‖ spender → u128 BE
///   tokens              : token              → bincode(TokenInfo)
///   prices              : token              → u128 BE
pub struct StateDb {
    _db: sled::Db,
    locks: sled::Tree,
    owner_locks: sled::Tree,
    time_criteria: sled::Tree,
    burn_criteria: sled::Tree,
    price_criteria: sled::Tree,
    marketcap_criteria: sled::Tree,
    multisig_criteria: sled::Tree,
    meta: sled::Tree,
    balances: sled::Tree,
    allowances: sled::Tree,
    tokens: sled::Tree,
    prices: sled::Tree,
}

fn storage(e: sled::Error) -> LockError {
    LockError::Storage(e.to_string())
}

fn get_record<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, LockError> {
    match tree.get(key).map_err(storage)? {
        Some(bytes) => {
            let v = bincode::deserialize(&bytes)
                .map_err(|e| LockError::Serialization(e.to_string()))?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn put_record<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), LockError> {
    let bytes = bincode::serialize(value).map_err(|e| LockError::Serialization(e.to_string()))?;
    tree.insert(key, bytes).map_err(storage)?;
    Ok(())
}

fn get_amount(tree: &sled::Tree, key: &[u8]) -> Result<Amount, LockError> {
    match tree.get(key).map_err(storage)? {
        Some(bytes) => {
            let arr: [u8; 16] = bytes[..]
                .try_into()
                .map_err(|_| LockError::Serialization("amount is not 16 bytes".into()))?;
            Ok(u128::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}

fn put_amount(tree: &sled::Tree, key: &[u8], value: Amount) -> Result<(), LockError> {
    tree.insert(key, value.to_be_bytes().to_vec()).map_err(storage)?;
    Ok(())
}

fn pair_key(a: &Address, b: &Address) -> [u8; 40] {
    let mut k = [0u8; 40];
    k[..20].copy_from_slice(a.as_bytes());
    k[20..].copy_from_slice(b.as_bytes());
    k
}

fn owner_lock_key(owner: &Address, id: LockId) -> [u8; 28] {
    let mut k = [0u8; 28];
    k[..20].copy_from_slice(owner.as_bytes());
    k[20..].copy_from_slice(&id.to_be_bytes());
    k
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LockError> {
        let db = sled::open(path).map_err(storage)?;
        let locks = db.open_tree("locks").map_err(storage)?;
        let owner_locks = db.open_tree("owner_locks").map_err(storage)?;
        let time_criteria = db.open_tree("time_criteria").map_err(storage)?;
        let burn_criteria = db.open_tree("burn_criteria").map_err(storage)?;
        let price_criteria = db.open_tree("price_criteria").map_err(storage)?;
        let marketcap_criteria = db.open_tree("marketcap_criteria").map_err(storage)?;
        let multisig_criteria = db.open_tree("multisig_criteria").map_err(storage)?;
        let meta = db.open_tree("meta").map_err(storage)?;
        let balances = db.open_tree("balances").map_err(storage)?;
        let allowances = db.open_tree("allowances").map_err(storage)?;
        let tokens = db.open_tree("tokens").map_err(storage)?;
        let prices = db.open_tree("prices").map_err(storage)?;
        Ok(Self {
            _db: db,
            locks,
            owner_locks,
            time_criteria,
            burn_criteria,
            price_criteria,
            marketcap_criteria,
            multisig_criteria,
            meta,
            balances,
            allowances,
            tokens,
            prices,
        })
    }

    // ── Locks ────────────────────────────────────────────────────────────────

    pub fn get_lock(&self, id: LockId) -> Result<Option<Lock>, LockError> {
        get_record(&self.locks, &id.to_be_bytes())
    }

    /// Insert or overwrite a lock and index it under its owner.
    pub fn put_lock(&self, lock: &Lock) -> Result<(), LockError> {
        put_record(&self.locks, &lock.id.to_be_bytes(), lock)?;
        self.owner_locks
            .insert(owner_lock_key(&lock.owner, lock.id), b"".as_ref())
            .map_err(storage)?;
        Ok(())
    }

    /// Lock ids owned by `owner`, ascending.
    pub fn lock_ids_by_owner(&self, owner: &Address) -> Result<Vec<LockId>, LockError> {
        let mut ids = Vec::new();
        for item in self.owner_locks.scan_prefix(owner.as_bytes()) {
            let (key, _) = item.map_err(storage)?;
            let arr: [u8; 8] = key[20..]
                .try_into()
                .map_err(|_| LockError::Storage("malformed owner index key".into()))?;
            ids.push(LockId::from_be_bytes(arr));
        }
        Ok(ids)
    }

    /// Every lock in id order.
    pub fn iter_locks(&self) -> Result<Vec<Lock>, LockError> {
        let mut out = Vec::new();
        for item in self.locks.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let lock = bincode::deserialize(&bytes)
                .map_err(|e| LockError::Serialization(e.to_string()))?;
            out.push(lock);
        }
        Ok(out)
    }

    // ── Criterion stores ─────────────────────────────────────────────────────

    pub fn get_time_criterion(&self, id: CriterionId) -> Result<Option<TimeCriterion>, LockError> {
        get_record(&self.time_criteria, &id.to_be_bytes())
    }

    pub fn put_time_criterion(&self, c: &TimeCriterion) -> Result<(), LockError> {
        put_record(&self.time_criteria, &c.id.to_be_bytes(), c)
    }

    pub fn get_burn_criterion(&self, id: CriterionId) -> Result<Option<BurnCriterion>, LockError> {
        get_record(&self.burn_criteria, &id.to_be_bytes())
    }

    pub fn put_burn_criterion(&self, c: &BurnCriterion) -> Result<(), LockError> {
        put_record(&self.burn_criteria, &c.id.to_be_bytes(), c)
    }

    pub fn get_price_criterion(&self, id: CriterionId) -> Result<Option<PriceCriterion>, LockError> {
        get_record(&self.price_criteria, &id.to_be_bytes())
    }

    pub fn put_price_criterion(&self, c: &PriceCriterion) -> Result<(), LockError> {
        put_record(&self.price_criteria, &c.id.to_be_bytes(), c)
    }

    pub fn get_market_cap_criterion(
        &self,
        id: CriterionId,
    ) -> Result<Option<MarketCapCriterion>, LockError> {
        get_record(&self.marketcap_criteria, &id.to_be_bytes())
    }

    pub fn put_market_cap_criterion(&self, c: &MarketCapCriterion) -> Result<(), LockError> {
        put_record(&self.marketcap_criteria, &c.id.to_be_bytes(), c)
    }

    pub fn get_multisig_criterion(
        &self,
        id: CriterionId,
    ) -> Result<Option<MultisigCriterion>, LockError> {
        get_record(&self.multisig_criteria, &id.to_be_bytes())
    }

    pub fn put_multisig_criterion(&self, c: &MultisigCriterion) -> Result<(), LockError> {
        put_record(&self.multisig_criteria, &c.id.to_be_bytes(), c)
    }

    // ── Counters ─────────────────────────────────────────────────────────────

    fn get_counter(&self, key: &str) -> Result<u64, LockError> {
        match self.get_meta(key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LockError::Storage(format!("counter {} is not 8 bytes", key)))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Next lock id to hand out (not reserved until `set_next_lock_id`).
    pub fn next_lock_id(&self) -> Result<LockId, LockError> {
        self.get_counter(META_NEXT_LOCK_ID)
    }

    pub fn set_next_lock_id(&self, id: LockId) -> Result<(), LockError> {
        self.put_meta(META_NEXT_LOCK_ID, &id.to_be_bytes())
    }

    /// Next criterion id; one counter serves all five stores.
    pub fn next_criterion_id(&self) -> Result<CriterionId, LockError> {
        self.get_counter(META_NEXT_CRITERION_ID)
    }

    pub fn set_next_criterion_id(&self, id: CriterionId) -> Result<(), LockError> {
        self.put_meta(META_NEXT_CRITERION_ID, &id.to_be_bytes())
    }

    // ── Engine configuration ─────────────────────────────────────────────────

    /// Stored as JSON so it can be inspected and edited by hand.
    pub fn get_config(&self) -> Result<Option<EngineConfig>, LockError> {
        match self.get_meta(META_ENGINE_CONFIG)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| LockError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn put_config(&self, config: &EngineConfig) -> Result<(), LockError> {
        let bytes =
            serde_json::to_vec(config).map_err(|e| LockError::Serialization(e.to_string()))?;
        self.put_meta(META_ENGINE_CONFIG, &bytes)
    }

    // ── Local token ledger ───────────────────────────────────────────────────

    pub fn get_token(&self, token: &Address) -> Result<Option<TokenInfo>, LockError> {
        get_record(&self.tokens, token.as_bytes())
    }

    pub fn put_token(&self, token: &Address, info: &TokenInfo) -> Result<(), LockError> {
        put_record(&self.tokens, token.as_bytes(), info)
    }

    pub fn iter_tokens(&self) -> Result<Vec<(Address, TokenInfo)>, LockError> {
        let mut out = Vec::new();
        for item in self.tokens.iter() {
            let (key, bytes) = item.map_err(storage)?;
            let arr: [u8; 20] = key[..]
                .try_into()
                .map_err(|_| LockError::Storage("malformed token key".into()))?;
            let info = bincode::deserialize(&bytes)
                .map_err(|e| LockError::Serialization(e.to_string()))?;
            out.push((Address(arr), info));
        }
        Ok(out)
    }

    pub fn get_balance(&self, token: &Address, holder: &Address) -> Result<Amount, LockError> {
        get_amount(&self.balances, &pair_key(token, holder))
    }

    pub fn put_balance(&self, token: &Address, holder: &Address, v: Amount) -> Result<(), LockError> {
        put_amount(&self.balances, &pair_key(token, holder), v)
    }

    pub fn get_allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, LockError> {
        let mut key = pair_key(token, owner).to_vec();
        key.extend_from_slice(spender.as_bytes());
        get_amount(&self.allowances, &key)
    }

    pub fn put_allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
        v: Amount,
    ) -> Result<(), LockError> {
        let mut key = pair_key(token, owner).to_vec();
        key.extend_from_slice(spender.as_bytes());
        put_amount(&self.allowances, &key, v)
    }

    // ── Local price oracle ───────────────────────────────────────────────────

    pub fn get_price(&self, token: &Address) -> Result<Option<Amount>, LockError> {
        if !self.prices.contains_key(token.as_bytes()).map_err(storage)? {
            return Ok(None);
        }
        get_amount(&self.prices, token.as_bytes()).map(Some)
    }

    pub fn put_price(&self, token: &Address, price: Amount) -> Result<(), LockError> {
        put_amount(&self.prices, token.as_bytes(), price)
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), LockError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, LockError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), LockError> {
        self._db.flush().map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptolock_core::lock::{ExprToken, LockState};

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("cryptolock_db_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn lock(id: LockId, owner: Address) -> Lock {
        Lock {
            id,
            owner,
            token: Address([9u8; 20]),
            amount: 100,
            fee_paid: 0,
            expression: vec![ExprToken::Placeholder("c1".into())],
            criteria: vec![],
            created_at: 0,
            state: LockState::Active,
        }
    }

    #[test]
    fn owner_index_lists_only_that_owner_in_id_order() {
        let db = temp_db("owner_index");
        let alice = Address([1u8; 20]);
        let bob = Address([2u8; 20]);
        for (id, owner) in [(3, alice), (1, bob), (0, alice), (300, alice)] {
            db.put_lock(&lock(id, owner)).unwrap();
        }
        assert_eq!(db.lock_ids_by_owner(&alice).unwrap(), vec![0, 3, 300]);
        assert_eq!(db.lock_ids_by_owner(&bob).unwrap(), vec![1]);
        assert_eq!(db.iter_locks().unwrap().len(), 4);
    }

    #[test]
    fn counters_default_to_zero_and_persist() {
        let db = temp_db("counters");
        assert_eq!(db.next_lock_id().unwrap(), 0);
        db.set_next_lock_id(7).unwrap();
        db.set_next_criterion_id(42).unwrap();
        assert_eq!(db.next_lock_id().unwrap(), 7);
        assert_eq!(db.next_criterion_id().unwrap(), 42);
    }

    #[test]
    fn balances_and_prices() {
        let db = temp_db("balances");
        let token = Address([5u8; 20]);
        let holder = Address([6u8; 20]);
        assert_eq!(db.get_balance(&token, &holder).unwrap(), 0);
        db.put_balance(&token, &holder, u128::MAX).unwrap();
        assert_eq!(db.get_balance(&token, &holder).unwrap(), u128::MAX);

        assert_eq!(db.get_price(&token).unwrap(), None);
        db.put_price(&token, 0).unwrap();
        assert_eq!(db.get_price(&token).unwrap(), Some(0));
    }

    #[test]
    fn config_round_trips_as_json() {
        let db = temp_db("config");
        assert!(db.get_config().unwrap().is_none());
        let mut cfg = EngineConfig::default();
        cfg.max_expression_tokens = 9;
        db.put_config(&cfg).unwrap();
        assert_eq!(db.get_config().unwrap().unwrap().max_expression_tokens, 9);
    }
}
