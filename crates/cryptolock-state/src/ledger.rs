//! External collaborators: the token ledger that holds custody and the price
//! oracle, plus local sled-backed implementations of both.

use cryptolock_core::error::LockError;
use cryptolock_core::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::db::StateDb;

// ── Traits ────────────────────────────────────────────────────────────────────

/// Fungible-token operations the engine consumes. Any error aborts the
/// enclosing engine operation.
pub trait TokenLedger {
    /// Move `amount` from `owner` to `to` using `spender`'s allowance.
    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LockError>;

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LockError>;

    fn balance_of(&self, token: &Address, holder: &Address) -> Result<Amount, LockError>;

    fn total_supply(&self, token: &Address) -> Result<Amount, LockError>;

    fn decimals(&self, token: &Address) -> Result<u8, LockError>;
}

/// Spot price source, 1e18 scale.
pub trait PriceOracle {
    fn fetch_price(&self, token: &Address) -> Result<Amount, LockError>;
}

// ── Local token ledger ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Amount,
}

/// Token ledger kept in the engine's own database.
#[derive(Clone)]
pub struct LocalLedger {
    db: Arc<StateDb>,
}

impl LocalLedger {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    fn token_info(&self, token: &Address) -> Result<TokenInfo, LockError> {
        self.db
            .get_token(token)?
            .ok_or_else(|| LockError::UnknownToken(token.to_hex()))
    }

    /// Register a token with zero supply. Re-registering keeps the supply.
    pub fn register_token(&self, token: &Address, symbol: &str, decimals: u8) -> Result<(), LockError> {
        let total_supply = self.db.get_token(token)?.map(|t| t.total_supply).unwrap_or(0);
        self.db.put_token(
            token,
            &TokenInfo { symbol: symbol.to_string(), decimals, total_supply },
        )?;
        debug!(token = %token, symbol, decimals, "token registered");
        Ok(())
    }

    pub fn mint(&self, token: &Address, to: &Address, amount: Amount) -> Result<(), LockError> {
        let mut info = self.token_info(token)?;
        info.total_supply = info
            .total_supply
            .checked_add(amount)
            .ok_or(LockError::ArithmeticOverflow)?;
        let balance = self.db.get_balance(token, to)?;
        let new_balance = balance.checked_add(amount).ok_or(LockError::ArithmeticOverflow)?;
        self.db.put_token(token, &info)?;
        self.db.put_balance(token, to, new_balance)?;
        debug!(token = %token, to = %to, amount, "minted");
        Ok(())
    }

    pub fn approve(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), LockError> {
        self.token_info(token)?;
        self.db.put_allowance(token, owner, spender, amount)
    }

    pub fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, LockError> {
        self.db.get_allowance(token, owner, spender)
    }

    pub fn tokens(&self) -> Result<Vec<(Address, TokenInfo)>, LockError> {
        self.db.iter_tokens()
    }

    fn move_balance(
        &self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LockError> {
        self.token_info(token)?;
        let have = self.db.get_balance(token, from)?;
        if have < amount {
            return Err(LockError::InsufficientBalance { need: amount, have });
        }
        if from == to {
            return Ok(());
        }
        let to_balance = self.db.get_balance(token, to)?;
        let credited = to_balance.checked_add(amount).ok_or(LockError::ArithmeticOverflow)?;
        self.db.put_balance(token, from, have - amount)?;
        self.db.put_balance(token, to, credited)?;
        Ok(())
    }
}

impl TokenLedger for LocalLedger {
    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LockError> {
        let allowed = self.db.get_allowance(token, owner, spender)?;
        if allowed < amount {
            return Err(LockError::InsufficientAllowance { need: amount, have: allowed });
        }
        self.move_balance(token, owner, to, amount)?;
        self.db.put_allowance(token, owner, spender, allowed - amount)
    }

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LockError> {
        self.move_balance(token, from, to, amount)
    }

    fn balance_of(&self, token: &Address, holder: &Address) -> Result<Amount, LockError> {
        self.db.get_balance(token, holder)
    }

    fn total_supply(&self, token: &Address) -> Result<Amount, LockError> {
        Ok(self.token_info(token)?.total_supply)
    }

    fn decimals(&self, token: &Address) -> Result<u8, LockError> {
        Ok(self.token_info(token)?.decimals)
    }
}

// ── Local price oracle ────────────────────────────────────────────────────────

/// Oracle whose prices are set by hand.
#[derive(Clone)]
pub struct LocalOracle {
    db: Arc<StateDb>,
}

impl LocalOracle {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    pub fn set_price(&self, token: &Address, price: Amount) -> Result<(), LockError> {
        self.db.put_price(token, price)?;
        debug!(token = %token, price, "price set");
        Ok(())
    }
}

impl PriceOracle for LocalOracle {
    fn fetch_price(&self, token: &Address) -> Result<Amount, LockError> {
        self.db
            .get_price(token)?
            .ok_or_else(|| LockError::OracleUnavailable(token.to_hex()))
    }
}
