// crates/elspeth-gate/src/routing.rs
// ============================================================================
// Module: Routing Resolution
// Description: Compiles a `RoutingAction` into concrete edge destinations.
// Purpose: Give the orchestrator and graph builder a single place that knows
// how gate decisions map to edge modes.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! `spec.md` §4.9: "Each action compiles to either a single `move` edge or a
//! set of edges with per-edge `mode` (copy for fanout, move for a single
//! destination)." [`resolve`] is that compilation step, shared by the graph
//! builder (which needs it to validate that every route has a destination)
//! and the orchestrator (which needs it to decide whether a route consumes
//! the current token or spawns forks).

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::EdgeMode;
use elspeth_core::RoutingAction;

// ============================================================================
// SECTION: Route Destination
// ============================================================================

/// One concrete destination a routing decision resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDestination {
    /// Destination edge label.
    pub label: String,
    /// `Move` consumes the current token; `Copy` preserves it for another
    /// destination (fan-out).
    pub mode: EdgeMode,
}

/// Resolves a [`RoutingAction`] into its concrete edge destinations.
///
/// - `Continue` resolves to a single `move` edge on `default_label`.
/// - `RouteTo` resolves to `move` edges on the named labels.
/// - `ForkTo` resolves to `copy` edges on the named labels (a fan-out; the
///   orchestrator is responsible for minting one child token per edge via
///   `fork_token`).
/// - `Reject` resolves to no destinations; the caller quarantines the row.
#[must_use]
pub fn resolve(action: &RoutingAction, default_label: &str) -> Vec<RouteDestination> {
    match action {
        RoutingAction::Continue => vec![RouteDestination {
            label: default_label.to_string(),
            mode: EdgeMode::Move,
        }],
        RoutingAction::RouteTo(labels) => labels
            .iter()
            .map(|label| RouteDestination {
                label: label.clone(),
                mode: EdgeMode::Move,
            })
            .collect(),
        RoutingAction::ForkTo(labels) => labels
            .iter()
            .map(|label| RouteDestination {
                label: label.clone(),
                mode: EdgeMode::Copy,
            })
            .collect(),
        RoutingAction::Reject { .. } => Vec::new(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
