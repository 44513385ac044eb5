use serde::{Deserialize, Serialize};
use std::fmt;

use crate::abi::{self, AbiReader, AbiValue};
use crate::constants::{FIXED_POINT_ONE, UNLOCK_MODE_FRACTION, UNLOCK_MODE_FULL};
use crate::criterion::CriterionType;
use crate::error::LockError;
use crate::types::{Address, Amount, CriterionId, LockId, Timestamp};

// ── Expression tokens ─────────────────────────────────────────────────────────

/// One symbol of a policy expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprToken {
    Open,
    Close,
    And,
    Or,
    /// Any non-reserved symbol; stands for one criterion.
    Placeholder(String),
}

impl ExprToken {
    /// Classify a raw symbol. `a`/`and` and `o`/`or` are accepted in any case.
    pub fn from_symbol(symbol: &str) -> Result<Self, LockError> {
        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return Err(LockError::MalformedExpression("empty symbol".into()));
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "(" => ExprToken::Open,
            ")" => ExprToken::Close,
            "a" | "and" | "&&" => ExprToken::And,
            "o" | "or" | "||" => ExprToken::Or,
            _ => ExprToken::Placeholder(trimmed.to_string()),
        })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ExprToken::Placeholder(_))
    }

    /// Canonical wire spelling.
    pub fn symbol(&self) -> &str {
        match self {
            ExprToken::Open => "(",
            ExprToken::Close => ")",
            ExprToken::And => "a",
            ExprToken::Or => "o",
            ExprToken::Placeholder(s) => s,
        }
    }
}

impl fmt::Display for ExprToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprToken::And => f.write_str("AND"),
            ExprToken::Or => f.write_str("OR"),
            other => f.write_str(other.symbol()),
        }
    }
}

// ── CriterionRef ──────────────────────────────────────────────────────────────

/// Binds one placeholder of a lock's expression to a stored criterion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionRef {
    /// Index of the placeholder in `Lock::expression`.
    pub position: usize,
    pub kind: CriterionType,
    pub id: CriterionId,
}

// ── LockState ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Active,
    /// Terminal.
    Consumed {
        consumed_at: Timestamp,
        recipient: Address,
        paid: Amount,
        /// Part of the amount left in custody by a fractional unlock.
        retained: Amount,
    },
}

// ── Lock ──────────────────────────────────────────────────────────────────────

/// A quantity of tokens held in custody until its policy evaluates to true.
///
/// Invariant: `criteria` has one entry per placeholder in `expression`,
/// sorted by `position` ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub owner: Address,
    pub token: Address,
    /// Amount in custody for this lock, net of any percentage fee.
    pub amount: Amount,
    /// Fee charged at creation (in `token` for percent mode, in the fee
    /// token for flat mode).
    pub fee_paid: Amount,
    pub expression: Vec<ExprToken>,
    pub criteria: Vec<CriterionRef>,
    pub created_at: Timestamp,
    pub state: LockState,
}

impl Lock {
    pub fn is_active(&self) -> bool {
        self.state == LockState::Active
    }

    /// Expression in wire spelling, e.g. `["(", "c1", "a", "c2", ")"]`.
    pub fn symbols(&self) -> Vec<String> {
        self.expression.iter().map(|t| t.symbol().to_string()).collect()
    }

    pub fn criterion_types(&self) -> Vec<CriterionType> {
        self.criteria.iter().map(|r| r.kind).collect()
    }

    pub fn criterion_ids(&self) -> Vec<CriterionId> {
        self.criteria.iter().map(|r| r.id).collect()
    }

    /// Infix rendering with placeholders replaced by `type#id`.
    pub fn render_policy(&self) -> String {
        let mut refs = self.criteria.iter().peekable();
        let mut parts = Vec::with_capacity(self.expression.len());
        for (pos, token) in self.expression.iter().enumerate() {
            match (token, refs.peek()) {
                (ExprToken::Placeholder(_), Some(r)) if r.position == pos => {
                    parts.push(format!("{}#{}", r.kind, r.id));
                    refs.next();
                }
                _ => parts.push(token.to_string()),
            }
        }
        parts.join(" ")
    }
}

// ── Unlock modes ──────────────────────────────────────────────────────────────

/// How much of a lock an unlock pays out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockMode {
    Full,
    /// Pay `amount × ratio / 1e18`, with `0 < ratio <= 1e18`.
    Fraction { ratio: Amount },
}

impl UnlockMode {
    /// Decode the `(mode, data)` auxiliary pair of an unlock call.
    pub fn decode(mode: u8, data: &[u8]) -> Result<Self, LockError> {
        match mode {
            UNLOCK_MODE_FULL => Ok(UnlockMode::Full),
            UNLOCK_MODE_FRACTION => {
                let r = AbiReader::new(data);
                r.expect_words(1)?;
                let mode = UnlockMode::Fraction { ratio: r.uint(0)? };
                mode.validate()?;
                Ok(mode)
            }
            other => Err(LockError::UnsupportedUnlockMode(other)),
        }
    }

    pub fn validate(&self) -> Result<(), LockError> {
        match self {
            UnlockMode::Fraction { ratio } if *ratio == 0 || *ratio > FIXED_POINT_ONE => Err(
                LockError::InvalidParameters("withdrawal ratio must be in (0, 1e18]".into()),
            ),
            _ => Ok(()),
        }
    }

    pub fn encode(&self) -> (u8, Vec<u8>) {
        match self {
            UnlockMode::Full => (UNLOCK_MODE_FULL, abi::encode(&[AbiValue::Uint(0)])),
            UnlockMode::Fraction { ratio } => {
                (UNLOCK_MODE_FRACTION, abi::encode(&[AbiValue::Uint(*ratio)]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_symbols_are_classified() {
        assert_eq!(ExprToken::from_symbol("(").unwrap(), ExprToken::Open);
        assert_eq!(ExprToken::from_symbol(")").unwrap(), ExprToken::Close);
        assert_eq!(ExprToken::from_symbol("a").unwrap(), ExprToken::And);
        assert_eq!(ExprToken::from_symbol("AND").unwrap(), ExprToken::And);
        assert_eq!(ExprToken::from_symbol("o").unwrap(), ExprToken::Or);
        assert_eq!(ExprToken::from_symbol("or").unwrap(), ExprToken::Or);
        assert_eq!(
            ExprToken::from_symbol("c1").unwrap(),
            ExprToken::Placeholder("c1".into())
        );
        assert!(ExprToken::from_symbol("  ").is_err());
    }

    #[test]
    fn fraction_mode_bounds() {
        let (mode, data) = UnlockMode::Fraction { ratio: FIXED_POINT_ONE / 2 }.encode();
        assert_eq!(UnlockMode::decode(mode, &data).unwrap(), UnlockMode::Fraction { ratio: FIXED_POINT_ONE / 2 });

        let zero = abi::encode(&[AbiValue::Uint(0)]);
        assert!(matches!(UnlockMode::decode(1, &zero), Err(LockError::InvalidParameters(_))));
        let over = abi::encode(&[AbiValue::Uint(FIXED_POINT_ONE + 1)]);
        assert!(matches!(UnlockMode::decode(1, &over), Err(LockError::InvalidParameters(_))));
        assert!(matches!(UnlockMode::decode(7, &zero), Err(LockError::UnsupportedUnlockMode(7))));
        assert_eq!(UnlockMode::decode(0, &[]).unwrap(), UnlockMode::Full);
    }

    #[test]
    fn render_policy_substitutes_criteria() {
        let lock = Lock {
            id: 0,
            owner: Address::ZERO,
            token: Address::ZERO,
            amount: 1,
            fee_paid: 0,
            expression: ["(", "c1", "a", "c2", ")", "o", "c3"]
                .iter()
                .map(|s| ExprToken::from_symbol(s).unwrap())
                .collect(),
            criteria: vec![
                CriterionRef { position: 1, kind: CriterionType::Time, id: 4 },
                CriterionRef { position: 3, kind: CriterionType::Burn, id: 5 },
                CriterionRef { position: 6, kind: CriterionType::Price, id: 6 },
            ],
            created_at: 0,
            state: LockState::Active,
        };
        assert_eq!(lock.render_policy(), "( time#4 AND burn#5 ) OR price#6");
        assert_eq!(lock.symbols()[2], "a");
    }
}
