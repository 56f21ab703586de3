// crates/elspeth-gate/src/gate.rs
// ============================================================================
// Module: Condition Gate
// Description: A `Gate` implementation driven by an ordered rule list.
// Purpose: Bridge `ConditionExpr` evaluation to the orchestrator's `Gate`
// contract.
// Dependencies: elspeth-core, crate::condition
// ============================================================================

//! ## Overview
//! [`ConditionGate`] evaluates an ordered list of `(condition, action)`
//! rules against a row; the first rule whose condition is `true` wins. No
//! matching rule falls through to `RoutingAction::Continue`. A condition
//! evaluation error quarantines the row rather than silently continuing —
//! `spec.md` §4.9 requires any runtime error during gate evaluation to mark
//! the row quarantined with the exception captured.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::GateError;
use elspeth_core::PluginContext;
use elspeth_core::RoutingAction;
use elspeth_core::RowData;

use crate::condition::ConditionError;
use crate::condition::ConditionEvaluator;
use crate::condition::ConditionExpr;
use crate::condition::RowConditionEvaluator;

// ============================================================================
// SECTION: Gate Rule
// ============================================================================

/// One `condition -> action` rule in a [`ConditionGate`]'s evaluation order.
#[derive(Debug, Clone)]
pub struct GateRule {
    /// Condition guarding this rule.
    pub condition: ConditionExpr,
    /// Action taken when `condition` evaluates `true`.
    pub action: RoutingAction,
}

impl GateRule {
    /// Builds a rule pairing `condition` with `action`.
    #[must_use]
    pub const fn new(condition: ConditionExpr, action: RoutingAction) -> Self {
        Self { condition, action }
    }
}

// ============================================================================
// SECTION: Condition Gate
// ============================================================================

/// Evaluates an ordered rule list against a row, returning the first
/// matching action or [`RoutingAction::Continue`] when nothing matches.
#[derive(Debug, Clone)]
pub struct ConditionGate {
    rules: Vec<GateRule>,
}

impl ConditionGate {
    /// Builds a gate from an ordered rule list.
    #[must_use]
    pub const fn new(rules: Vec<GateRule>) -> Self {
        Self { rules }
    }

    /// Returns this gate's rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[GateRule] {
        &self.rules
    }
}

impl elspeth_core::Gate for ConditionGate {
    fn decide(&self, row: &RowData, _ctx: &PluginContext<'_>) -> Result<RoutingAction, GateError> {
        let evaluator = RowConditionEvaluator;
        for rule in &self.rules {
            if evaluator.evaluate_bool(&rule.condition, row).map_err(condition_error_to_gate_error)? {
                return Ok(rule.action.clone());
            }
        }
        Ok(RoutingAction::Continue)
    }
}

fn condition_error_to_gate_error(error: ConditionError) -> GateError {
    GateError::Evaluation(error.to_string())
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
    use elspeth_core::Gate as _;
    use elspeth_core::NodeId;
    use elspeth_core::RunId;
    use elspeth_core::SystemClock;
    use elspeth_core::Value;

    use super::*;

    fn ctx<'a>(run_id: &'a RunId, node_id: &'a NodeId, clock: &'a SystemClock) -> PluginContext<'a> {
        PluginContext {
            run_id,
            node_id,
            clock,
            calls: None,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let gate = ConditionGate::new(vec![
            GateRule::new(
                ConditionExpr::Gt(Box::new(ConditionExpr::field("value")), Box::new(ConditionExpr::literal(Value::Int(1)))),
                RoutingAction::RouteTo(vec!["high".to_string()]),
            ),
            GateRule::new(ConditionExpr::literal(Value::Bool(true)), RoutingAction::Continue),
        ]);
        let row = RowData::new().with_field("value", Value::Int(10));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let clock = SystemClock;
        let action = gate.decide(&row, &ctx(&run_id, &node_id, &clock)).unwrap();
        assert_eq!(action, RoutingAction::RouteTo(vec!["high".to_string()]));
    }

    #[test]
    fn no_match_continues() {
        let gate = ConditionGate::new(vec![GateRule::new(
            ConditionExpr::Gt(Box::new(ConditionExpr::field("value")), Box::new(ConditionExpr::literal(Value::Int(100)))),
            RoutingAction::RouteTo(vec!["high".to_string()]),
        )]);
        let row = RowData::new().with_field("value", Value::Int(1));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let clock = SystemClock;
        assert_eq!(gate.decide(&row, &ctx(&run_id, &node_id, &clock)).unwrap(), RoutingAction::Continue);
    }

    #[test]
    fn evaluation_error_surfaces_as_gate_error() {
        let gate = ConditionGate::new(vec![GateRule::new(
            ConditionExpr::Gt(Box::new(ConditionExpr::field("missing")), Box::new(ConditionExpr::literal(Value::Int(1)))),
            RoutingAction::RouteTo(vec!["high".to_string()]),
        )]);
        let row = RowData::new();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let clock = SystemClock;
        assert!(matches!(gate.decide(&row, &ctx(&run_id, &node_id, &clock)), Err(GateError::Evaluation(_))));
    }
}
