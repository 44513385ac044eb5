//! Reduction of a bound expression to one boolean.
//!
//! Every criterion is resolved before any reduction happens, so evaluation
//! does not short-circuit and a failing lookup always surfaces as an error.

use cryptolock_core::error::LockError;
use cryptolock_core::lock::{CriterionRef, ExprToken};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Barrier,
    And,
    Or,
}

fn invariant(msg: impl Into<String>) -> LockError {
    LockError::PolicyInvariant(msg.into())
}

/// Evaluate `tokens` with each placeholder at `refs[i].position` replaced by
/// `resolve(&refs[i])`.
pub fn evaluate<F>(tokens: &[ExprToken], refs: &[CriterionRef], mut resolve: F) -> Result<bool, LockError>
where
    F: FnMut(&CriterionRef) -> Result<bool, LockError>,
{
    let mut values: Vec<Option<bool>> = vec![None; tokens.len()];
    for r in refs {
        match tokens.get(r.position) {
            Some(ExprToken::Placeholder(_)) => {}
            _ => {
                return Err(invariant(format!(
                    "{} criterion {} bound to non-placeholder position {}",
                    r.kind, r.id, r.position
                )))
            }
        }
        let v = resolve(r)?;
        trace!(kind = %r.kind, id = r.id, position = r.position, satisfied = v, "criterion resolved");
        values[r.position] = Some(v);
    }
    reduce(tokens, &values)
}

/// Evaluate with placeholder values given left to right.
pub fn evaluate_values(tokens: &[ExprToken], placeholder_values: &[bool]) -> Result<bool, LockError> {
    let mut supplied = placeholder_values.iter();
    let mut values = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.is_placeholder() {
            let v = supplied
                .next()
                .ok_or_else(|| invariant("fewer values than placeholders"))?;
            values.push(Some(*v));
        } else {
            values.push(None);
        }
    }
    if supplied.next().is_some() {
        return Err(invariant("more values than placeholders"));
    }
    reduce(tokens, &values)
}

/// Two-stack reduction. AND and OR share one precedence level and apply
/// left to right; `(` is a barrier that `)` unwinds to.
fn reduce(tokens: &[ExprToken], values: &[Option<bool>]) -> Result<bool, LockError> {
    let mut operands: Vec<bool> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();

    for (pos, token) in tokens.iter().enumerate() {
        match token {
            ExprToken::Placeholder(name) => {
                let v = values
                    .get(pos)
                    .copied()
                    .flatten()
                    .ok_or_else(|| invariant(format!("placeholder '{}' at {} is unbound", name, pos)))?;
                operands.push(v);
            }
            ExprToken::Open => ops.push(Op::Barrier),
            ExprToken::Close => {
                loop {
                    match ops.pop() {
                        Some(Op::Barrier) => break,
                        Some(op) => apply(op, &mut operands)?,
                        None => return Err(invariant(format!("unbalanced ')' at {}", pos))),
                    }
                }
            }
            ExprToken::And | ExprToken::Or => {
                while let Some(&top) = ops.last() {
                    if top == Op::Barrier {
                        break;
                    }
                    ops.pop();
                    apply(top, &mut operands)?;
                }
                ops.push(if *token == ExprToken::And { Op::And } else { Op::Or });
            }
        }
    }

    while let Some(op) = ops.pop() {
        if op == Op::Barrier {
            return Err(invariant("unbalanced '('"));
        }
        apply(op, &mut operands)?;
    }

    match operands.as_slice() {
        [v] => Ok(*v),
        other => Err(invariant(format!("expression reduced to {} values", other.len()))),
    }
}

fn apply(op: Op, operands: &mut Vec<bool>) -> Result<(), LockError> {
    let rhs = operands.pop().ok_or_else(|| invariant("operator without right operand"))?;
    let lhs = operands.pop().ok_or_else(|| invariant("operator without left operand"))?;
    operands.push(match op {
        Op::And => lhs && rhs,
        Op::Or => lhs || rhs,
        Op::Barrier => return Err(invariant("barrier applied as operator")),
    });
    Ok(())
}
