// crates/elspeth-gate/src/lib.rs
// ============================================================================
// Crate: elspeth-gate
// Description: Condition expression AST, evaluator, and `Gate` implementation.
// Dependencies: elspeth-core, thiserror
// ============================================================================

//! ## Overview
//! `elspeth-gate` implements `spec.md` §4.9: a closed condition-expression
//! AST ([`condition::ConditionExpr`]) evaluated by [`condition::ConditionEvaluator`],
//! an ordered-rule [`gate::ConditionGate`] implementing `elspeth_core::Gate`,
//! and [`routing::resolve`] which compiles a `RoutingAction` into concrete
//! edge destinations for the graph builder and orchestrator to share.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod condition;
pub mod gate;
pub mod routing;

pub use condition::ConditionError;
pub use condition::ConditionEvaluator;
pub use condition::ConditionExpr;
pub use condition::RowConditionEvaluator;
pub use gate::ConditionGate;
pub use gate::GateRule;
pub use routing::RouteDestination;
pub use routing::resolve;
