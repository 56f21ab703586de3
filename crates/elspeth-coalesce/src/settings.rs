// crates/elspeth-coalesce/src/settings.rs
// ============================================================================
// Module: Coalesce Settings
// Description: Declarative per-coalesce configuration: branch list, merge
// policy, merge strategy, and an optional timeout.
// Purpose: Give the orchestrator a plain value type to register one
// `CoalesceExecutor` entry per named coalesce node, mirroring `spec.md`
// §4.8's registration contract.
// Dependencies: std::time
// ============================================================================

//! ## Overview
//! A coalesce node never has plugin code of its own (`spec.md` §6: "Coalesce:
//! declarative settings only (no plugin)"); [`CoalesceSettings`] is the whole
//! of its configuration surface.

use std::time::Duration;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// The merge-trigger policy for a named coalesce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// Hold until every declared branch has arrived.
    RequireAll,
    /// Merge on the first arrival; later arrivals are late.
    First,
    /// Merge on the Nth arrival.
    Quorum(u32),
    /// Merge whatever has arrived when the timeout fires or the source ends.
    BestEffort,
}

// ============================================================================
// SECTION: Merge Strategy
// ============================================================================

/// How arrived branch rows are combined into the merged row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Shallow merge of all branch rows; last-writer-wins by arrival order.
    Union,
    /// A dictionary keyed by branch name, each value the branch's row.
    Nested,
    /// Copy the named branch's row verbatim.
    Select(String),
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Registration settings for one named coalesce node.
#[derive(Debug, Clone)]
pub struct CoalesceSettings {
    /// Coalesce node name (also its node id in the execution graph).
    pub name: String,
    /// Branch labels this coalesce expects one incoming edge per.
    pub branches: Vec<String>,
    /// Merge-trigger policy.
    pub policy: CoalescePolicy,
    /// Merge strategy applied once the policy triggers a merge.
    pub merge_strategy: MergeStrategy,
    /// Optional wall-clock deadline after which `check_timeouts` resolves a
    /// pending merge even if its policy has not otherwise triggered.
    pub timeout: Option<Duration>,
}
