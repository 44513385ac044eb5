use cryptolock_core::constants::DEFAULT_MAX_EXPRESSION_TOKENS;
use cryptolock_core::criterion::CriterionDescriptor;
use cryptolock_core::error::LockError;
use cryptolock_core::lock::{CriterionRef, ExprToken};
use cryptolock_core::types::CriterionId;

/// Size bounds applied by [`compile`].
#[derive(Clone, Copy, Debug)]
pub struct ExpressionLimits {
    pub max_tokens: usize,
}

impl Default for ExpressionLimits {
    fn default() -> Self {
        Self { max_tokens: DEFAULT_MAX_EXPRESSION_TOKENS }
    }
}

/// A structurally valid expression and the positions of its placeholders,
/// left to right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledExpression {
    pub tokens: Vec<ExprToken>,
    pub placeholder_positions: Vec<usize>,
}

fn malformed(msg: impl Into<String>) -> LockError {
    LockError::MalformedExpression(msg.into())
}

/// Parse and validate a lock request's expression.
///
/// Checks (in order):
/// 1. Non-empty and within `limits.max_tokens`
/// 2. Every symbol classifies to a token
/// 3. Grammar: operands and operators alternate, groups are balanced and
///    non-empty, and one group never mixes AND with OR
/// 4. `criterion_count`, `declared_positions` and `descriptor_count` all
///    agree with the placeholders actually present
pub fn compile<S: AsRef<str>>(
    symbols: &[S],
    criterion_count: usize,
    declared_positions: &[usize],
    descriptor_count: usize,
    limits: &ExpressionLimits,
) -> Result<CompiledExpression, LockError> {
    // ── 1. Size ──────────────────────────────────────────────────────────────
    if symbols.is_empty() {
        return Err(malformed("expression is empty"));
    }
    if symbols.len() > limits.max_tokens {
        return Err(malformed(format!(
            "expression has {} tokens, maximum is {}",
            symbols.len(),
            limits.max_tokens
        )));
    }

    // ── 2. Tokenize ──────────────────────────────────────────────────────────
    let tokens = symbols
        .iter()
        .map(|s| ExprToken::from_symbol(s.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    // ── 3. Grammar ───────────────────────────────────────────────────────────
    let placeholder_positions = check_grammar(&tokens)?;

    // ── 4. Placeholder bookkeeping ───────────────────────────────────────────
    let found = placeholder_positions.len();
    if criterion_count != found {
        return Err(malformed(format!(
            "criterion count {} does not match {} placeholders",
            criterion_count, found
        )));
    }
    if descriptor_count != found {
        return Err(malformed(format!(
            "{} criteria supplied for {} placeholders",
            descriptor_count, found
        )));
    }
    if declared_positions != placeholder_positions.as_slice() {
        return Err(malformed(format!(
            "declared placeholder positions {:?} do not match actual {:?}",
            declared_positions, placeholder_positions
        )));
    }

    Ok(CompiledExpression { tokens, placeholder_positions })
}

/// Returns placeholder positions if `tokens` is well formed.
fn check_grammar(tokens: &[ExprToken]) -> Result<Vec<usize>, LockError> {
    // One entry per open group: the operator already used at that level.
    let mut groups: Vec<Option<&ExprToken>> = vec![None];
    let mut expect_operand = true;
    let mut positions = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            ExprToken::Placeholder(_) => {
                if !expect_operand {
                    return Err(malformed(format!("missing operator before position {}", i)));
                }
                positions.push(i);
                expect_operand = false;
            }
            ExprToken::Open => {
                if !expect_operand {
                    return Err(malformed(format!("'(' at position {} must follow an operator", i)));
                }
                groups.push(None);
            }
            ExprToken::Close => {
                if expect_operand {
                    return Err(malformed(format!(
                        "')' at position {} closes an empty group or follows an operator",
                        i
                    )));
                }
                if groups.len() == 1 {
                    return Err(malformed(format!("unbalanced ')' at position {}", i)));
                }
                groups.pop();
            }
            ExprToken::And | ExprToken::Or => {
                if expect_operand {
                    return Err(malformed(format!("operator at position {} has no left operand", i)));
                }
                let level = groups.last_mut().ok_or_else(|| malformed("group stack underflow"))?;
                if let Some(prev) = *level {
                    if prev != token {
                        return Err(malformed(format!(
                            "AND and OR mixed in one group at position {}; add parentheses",
                            i
                        )));
                    }
                }
                *level = Some(token);
                expect_operand = true;
            }
        }
    }

    if expect_operand {
        return Err(malformed("expression ends without a final operand"));
    }
    if groups.len() != 1 {
        return Err(malformed(format!("{} unclosed '('", groups.len() - 1)));
    }
    Ok(positions)
}

/// Allocate one criterion per placeholder, in order, and bind them.
///
/// `allocate` is the criterion store constructor; it returns the fresh id.
/// The first error aborts the binding and is returned unchanged.
pub fn bind_criteria<F>(
    compiled: &CompiledExpression,
    descriptors: &[CriterionDescriptor],
    mut allocate: F,
) -> Result<Vec<CriterionRef>, LockError>
where
    F: FnMut(&CriterionDescriptor) -> Result<CriterionId, LockError>,
{
    if descriptors.len() != compiled.placeholder_positions.len() {
        return Err(malformed("descriptor count changed after compilation"));
    }
    compiled
        .placeholder_positions
        .iter()
        .zip(descriptors)
        .map(|(&position, desc)| {
            let id = allocate(desc)?;
            Ok(CriterionRef { position, kind: desc.kind, id })
        })
        .collect()
}
