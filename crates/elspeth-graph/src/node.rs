// crates/elspeth-graph/src/node.rs
// ============================================================================
// Module: Graph Node and Edge Specs
// Description: The pre-run planning representation of a pipeline's topology.
// Purpose: Give `GraphBuilder` a concrete vocabulary for the six node kinds
// `spec.md` §4.5 describes, distinct from the Landscape's post-hoc audit
// `Node`/`Edge` records (`elspeth_core::core::model`), which only exist once
// a run has actually registered them.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! A [`GraphNode`] names one participant in the execution graph and carries
//! the schema contracts graph validation checks for coverage. A [`GraphEdge`]
//! is a labeled, directed connection between two nodes; its `mode` decides
//! whether traversal consumes the token (`Move`) or forks it (`Copy`).

use elspeth_core::EdgeMode;
use elspeth_core::NodeType;
use elspeth_core::SchemaContract;

/// One node in the execution graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Stable identifier, unique within the graph.
    pub id: String,
    /// The kind of node this is, reusing the Landscape's persisted
    /// `NodeType` — batch-aware transforms are still `NodeType::Transform`;
    /// "batch-aware" is an orthogonal runtime property of the plugin
    /// instance, not a distinct node kind in the graph or the audit schema.
    pub node_type: NodeType,
    /// Schema this node requires on its incoming rows.
    pub input_schema: SchemaContract,
    /// Schema this node guarantees on its outgoing rows.
    pub output_schema: SchemaContract,
}

impl GraphNode {
    /// Builds a node spec from its id, kind, and schema pair.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        input_schema: SchemaContract,
        output_schema: SchemaContract,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            input_schema,
            output_schema,
        }
    }
}

/// One directed, labeled edge in the execution graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// Source node id.
    pub from: String,
    /// Destination node id.
    pub to: String,
    /// Edge label (a route name, branch name, or `"continue"`).
    pub label: String,
    /// `Move` consumes the token; `Copy` forks it.
    pub mode: EdgeMode,
}

impl GraphEdge {
    /// Builds an edge.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>, mode: EdgeMode) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            mode,
        }
    }
}

/// The reserved label used for a node's default, non-routed continuation.
pub const CONTINUE_LABEL: &str = "continue";
