//! cryptolock-policy
//!
//! Policy expressions over criteria: the compiler that validates a flat token
//! sequence and binds each placeholder to a criterion, and the evaluator that
//! reduces a bound expression to a single boolean.
//!
//! Expressions stay flat (no tree is built). AND and OR have equal
//! precedence and associate left; mixing them inside one group is rejected
//! at compile time, so every accepted expression has exactly one reading.

pub mod evaluator;
pub mod expression;

pub use evaluator::{evaluate, evaluate_values};
pub use expression::{bind_criteria, compile, CompiledExpression, ExpressionLimits};
