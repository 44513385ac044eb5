//! Fixed-point helpers.
//!
//! Products such as `total_supply × price` or `balance × 1e18` easily exceed
//! 128 bits for 18-decimal tokens, so every multiply-then-divide goes through
//! a 256-bit intermediate and is floored, matching EVM integer division.

use primitive_types::U256;

use crate::constants::FIXED_POINT_ONE;
use crate::error::LockError;
use crate::types::Amount;

/// `floor(a × b / denominator)`.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Result<Amount, LockError> {
    if denominator == 0 {
        return Err(LockError::DivisionByZero);
    }
    // Both factors are below 2^128, so the product always fits in 256 bits.
    let product = U256::from(a)
        .checked_mul(U256::from(b))
        .ok_or(LockError::ArithmeticOverflow)?;
    let quotient = product / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(LockError::ArithmeticOverflow);
    }
    Ok(quotient.as_u128())
}

/// `part / whole` in 1e18 fixed point. `None` when `whole` is zero.
pub fn ratio(part: Amount, whole: Amount) -> Option<Amount> {
    if whole == 0 {
        return None;
    }
    mul_div(part, FIXED_POINT_ONE, whole).ok()
}

/// Market capitalisation `supply × price / unit`, where `unit` is
/// `10^decimals` of the token.
pub fn market_cap(total_supply: Amount, price: Amount, decimals: u8) -> Result<Amount, LockError> {
    let unit = token_unit(decimals)?;
    mul_div(total_supply, price, unit)
}

/// `10^decimals`, the number of base units in one whole token.
pub fn token_unit(decimals: u8) -> Result<Amount, LockError> {
    10u128
        .checked_pow(decimals as u32)
        .ok_or(LockError::ArithmeticOverflow)
}
