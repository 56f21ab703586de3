// crates/elspeth-gate/src/condition.rs
// ============================================================================
// Module: Condition Expression
// Description: Closed AST for gate conditions and its evaluator.
// Purpose: Evaluate a condition over a row without an embedded scripting
// language (`spec.md` §4.9's "sandboxed environment").
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! `ConditionExpr` is a closed tree of comparisons and boolean combinators
//! over row fields and literals. There is no general expression evaluator,
//! no user-supplied code, and no recursion beyond the tree's own depth — the
//! condition language is exactly as expressive as the enum and nothing more.
//! [`evaluate`] is the sandboxed environment: any field reference that is
//! missing, or a comparison between incompatible types, is a typed error
//! rather than a panic or a silent `false`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::value::RowData;
use elspeth_core::core::value::Value;

// ============================================================================
// SECTION: AST
// ============================================================================

/// A closed condition expression evaluated over a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    /// `lhs == rhs`.
    Eq(Box<ConditionExpr>, Box<ConditionExpr>),
    /// `lhs != rhs`.
    Ne(Box<ConditionExpr>, Box<ConditionExpr>),
    /// `lhs < rhs` (numeric only).
    Lt(Box<ConditionExpr>, Box<ConditionExpr>),
    /// `lhs <= rhs` (numeric only).
    Le(Box<ConditionExpr>, Box<ConditionExpr>),
    /// `lhs > rhs` (numeric only).
    Gt(Box<ConditionExpr>, Box<ConditionExpr>),
    /// `lhs >= rhs` (numeric only).
    Ge(Box<ConditionExpr>, Box<ConditionExpr>),
    /// Logical AND over every operand; empty list evaluates `true`.
    And(Vec<ConditionExpr>),
    /// Logical OR over every operand; empty list evaluates `false`.
    Or(Vec<ConditionExpr>),
    /// Logical negation of a boolean sub-expression.
    Not(Box<ConditionExpr>),
    /// A row field reference by name.
    FieldRef(String),
    /// A literal value.
    Literal(Value),
}

impl ConditionExpr {
    /// Shorthand for `FieldRef`.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::FieldRef(name.into())
    }

    /// Shorthand for `Literal`.
    #[must_use]
    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised evaluating a [`ConditionExpr`] over a row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// The referenced field does not exist on the row.
    #[error("field not found: {0}")]
    MissingField(String),
    /// An ordering comparison (`<`, `<=`, `>`, `>=`) was applied to
    /// non-numeric operands.
    #[error("cannot compare {lhs} and {rhs} as numbers")]
    NotComparable {
        /// Left operand's type name.
        lhs: &'static str,
        /// Right operand's type name.
        rhs: &'static str,
    },
    /// A boolean context (`And`/`Or`/`Not`, or the condition's own final
    /// result) received a non-boolean value.
    #[error("expected a boolean value, found {0}")]
    NotBoolean(&'static str),
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Evaluates a [`ConditionExpr`] against a [`RowData`], bottom-up, with no
/// side effects and no access outside the row it is given.
pub trait ConditionEvaluator {
    /// Evaluates `expr` to a [`Value`].
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when a field reference is missing, an
    /// ordering comparison receives non-numeric operands, or a boolean
    /// combinator receives a non-boolean operand.
    fn evaluate(&self, expr: &ConditionExpr, row: &RowData) -> Result<Value, ConditionError>;

    /// Evaluates `expr` and requires the result to be a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::NotBoolean`] when `expr` evaluates to a
    /// non-boolean value, in addition to the errors [`Self::evaluate`] may
    /// return.
    fn evaluate_bool(&self, expr: &ConditionExpr, row: &RowData) -> Result<bool, ConditionError> {
        match self.evaluate(expr, row)? {
            Value::Bool(value) => Ok(value),
            other => Err(ConditionError::NotBoolean(other.type_name())),
        }
    }
}

/// The sole [`ConditionEvaluator`] Elspeth ships: a direct tree walk with no
/// external state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowConditionEvaluator;

impl ConditionEvaluator for RowConditionEvaluator {
    fn evaluate(&self, expr: &ConditionExpr, row: &RowData) -> Result<Value, ConditionError> {
        match expr {
            ConditionExpr::Literal(value) => Ok(value.clone()),
            ConditionExpr::FieldRef(name) => row.get(name).cloned().ok_or_else(|| ConditionError::MissingField(name.clone())),
            ConditionExpr::Eq(lhs, rhs) => Ok(Value::Bool(self.evaluate(lhs, row)? == self.evaluate(rhs, row)?)),
            ConditionExpr::Ne(lhs, rhs) => Ok(Value::Bool(self.evaluate(lhs, row)? != self.evaluate(rhs, row)?)),
            ConditionExpr::Lt(lhs, rhs) => self.compare(lhs, rhs, row, |a, b| a < b),
            ConditionExpr::Le(lhs, rhs) => self.compare(lhs, rhs, row, |a, b| a <= b),
            ConditionExpr::Gt(lhs, rhs) => self.compare(lhs, rhs, row, |a, b| a > b),
            ConditionExpr::Ge(lhs, rhs) => self.compare(lhs, rhs, row, |a, b| a >= b),
            ConditionExpr::Not(inner) => Ok(Value::Bool(!self.evaluate_bool(inner, row)?)),
            ConditionExpr::And(operands) => {
                for operand in operands {
                    if !self.evaluate_bool(operand, row)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            ConditionExpr::Or(operands) => {
                for operand in operands {
                    if self.evaluate_bool(operand, row)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
        }
    }
}

impl RowConditionEvaluator {
    fn compare(
        &self,
        lhs: &ConditionExpr,
        rhs: &ConditionExpr,
        row: &RowData,
        op: impl Fn(f64, f64) -> bool,
    ) -> Result<Value, ConditionError> {
        let lhs_value = self.evaluate(lhs, row)?;
        let rhs_value = self.evaluate(rhs, row)?;
        let (Some(lhs_num), Some(rhs_num)) = (lhs_value.as_float(), rhs_value.as_float()) else {
            return Err(ConditionError::NotComparable {
                lhs: lhs_value.type_name(),
                rhs: rhs_value.type_name(),
            });
        };
        Ok(Value::Bool(op(lhs_num, rhs_num)))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only panic-based assertions are permitted."
    )]
    use super::*;

    fn row() -> RowData {
        RowData::new().with_field("value", Value::Int(5)).with_field("label", Value::String("high".to_string()))
    }

    #[test]
    fn gt_compares_field_against_literal() {
        let evaluator = RowConditionEvaluator;
        let expr = ConditionExpr::Gt(Box::new(ConditionExpr::field("value")), Box::new(ConditionExpr::literal(Value::Int(1))));
        assert!(evaluator.evaluate_bool(&expr, &row()).unwrap());
    }

    #[test]
    fn missing_field_is_an_error() {
        let evaluator = RowConditionEvaluator;
        let expr = ConditionExpr::Eq(Box::new(ConditionExpr::field("missing")), Box::new(ConditionExpr::literal(Value::Int(1))));
        assert!(matches!(evaluator.evaluate(&expr, &row()), Err(ConditionError::MissingField(_))));
    }

    #[test]
    fn ordering_non_numeric_operands_is_an_error() {
        let evaluator = RowConditionEvaluator;
        let expr = ConditionExpr::Lt(Box::new(ConditionExpr::field("label")), Box::new(ConditionExpr::literal(Value::Int(1))));
        assert!(matches!(evaluator.evaluate(&expr, &row()), Err(ConditionError::NotComparable { .. })));
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let evaluator = RowConditionEvaluator;
        let expr = ConditionExpr::And(vec![
            ConditionExpr::Eq(Box::new(ConditionExpr::literal(Value::Bool(false))), Box::new(ConditionExpr::literal(Value::Bool(true)))),
            ConditionExpr::Eq(Box::new(ConditionExpr::field("missing")), Box::new(ConditionExpr::literal(Value::Int(1)))),
        ]);
        assert_eq!(evaluator.evaluate_bool(&expr, &row()).unwrap(), false);
    }

    #[test]
    fn empty_and_is_vacuously_true() {
        let evaluator = RowConditionEvaluator;
        assert!(evaluator.evaluate_bool(&ConditionExpr::And(Vec::new()), &row()).unwrap());
    }

    #[test]
    fn empty_or_is_vacuously_false() {
        let evaluator = RowConditionEvaluator;
        assert!(!evaluator.evaluate_bool(&ConditionExpr::Or(Vec::new()), &row()).unwrap());
    }
}
