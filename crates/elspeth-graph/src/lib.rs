// crates/elspeth-graph/src/lib.rs
// ============================================================================
// Crate: elspeth-graph
// Description: Execution graph construction, validation, and topology
// hashing.
// Dependencies: elspeth-core, thiserror
// ============================================================================

//! ## Overview
//! `elspeth-graph` implements `spec.md` §4.5: a pre-run planning structure
//! distinct from the Landscape's post-hoc audit `Node`/`Edge` records. A
//! [`GraphBuilder`] assembles a [`Graph`] from declarative specs (one per
//! source, transform, gate, aggregation, coalesce node, and sink),
//! [`Graph::validate`] runs the structural and schema checks the orchestrator
//! requires before a run starts, and [`Graph::topology_hash`] gives resume a
//! stable fingerprint to compare a checkpointed run's graph shape against.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod builder;
pub mod node;
mod topology;
mod validate;

pub use builder::AggregationSpec;
pub use builder::CoalesceSpec;
pub use builder::GateRoute;
pub use builder::GateSpec;
pub use builder::GraphBuilder;
pub use builder::SinkSpec;
pub use builder::SourceSpec;
pub use builder::TransformSpec;
pub use node::GraphEdge;
pub use node::GraphNode;
pub use node::CONTINUE_LABEL;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use elspeth_core::HashError;

/// A constructed, not-yet-validated execution graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Graph {
    /// Every node in the graph.
    pub nodes: Vec<GraphNode>,
    /// Every directed edge in the graph.
    pub edges: Vec<GraphEdge>,
    /// For each coalesce node id, the branch labels its spec declared.
    /// `Graph::validate` checks this set matches the incoming edge labels
    /// actually wired to that node.
    pub coalesce_branches: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Returns the node with the given id, if present.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Returns every edge whose `from` matches `id`.
    #[must_use]
    pub fn outgoing_edges(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|edge| edge.from == id).collect()
    }
}

/// Errors raised building, validating, or hashing a [`Graph`].
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Two specs declared the same node id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    /// An edge named a destination no spec declared.
    #[error("edge destination not declared among node specs: {0}")]
    UnknownDestination(String),
    /// No node with `NodeType::Source` exists in the graph.
    #[error("graph has no source node")]
    MissingSource,
    /// The graph contains a cycle reachable from the node named.
    #[error("cycle detected at node: {0}")]
    Cycle(String),
    /// A node is not reachable from the source.
    #[error("node unreachable from source: {0}")]
    UnreachableNode(String),
    /// A node with no outgoing edges is not a sink.
    #[error("terminal node is not a sink: {0}")]
    TerminalNodeNotSink(String),
    /// A coalesce node has no incoming edges to merge.
    #[error("coalesce node has no incoming branch edges: {0}")]
    CoalesceHasNoIncomingEdges(String),
    /// An upstream node's output schema does not cover a downstream node's
    /// required input fields.
    #[error("schema mismatch on edge {from} -> {to}: upstream output does not cover downstream input")]
    SchemaMismatch {
        /// Upstream node id.
        from: String,
        /// Downstream node id.
        to: String,
    },
    /// Canonical hashing of the topology fingerprint failed.
    #[error("failed to hash graph topology: {0}")]
    Hashing(#[source] HashError),
}

impl From<GraphError> for elspeth_core::EngineError {
    fn from(error: GraphError) -> Self {
        Self::GraphValidation(error.to_string())
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
    use elspeth_core::EdgeMode;
    use elspeth_core::FieldSpec;
    use elspeth_core::FieldType;
    use elspeth_core::SchemaContract;

    use super::*;

    fn schema() -> SchemaContract {
        SchemaContract::fixed(vec![FieldSpec::required("id", FieldType::Int)])
    }

    fn linear_graph() -> Graph {
        GraphBuilder::from_plugin_instances(
            SourceSpec { id: "source".to_string(), output_schema: schema() },
            vec![TransformSpec { id: "transform".to_string(), input_schema: schema(), output_schema: schema() }],
            vec![SinkSpec { id: "sink".to_string(), input_schema: schema() }],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            "sink",
        )
        .unwrap()
    }

    #[test]
    fn linear_pipeline_builds_and_validates() {
        let graph = linear_graph();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.outgoing_edges("transform").len(), 1);
    }

    #[test]
    fn unknown_destination_is_rejected_at_build_time() {
        let result = GraphBuilder::from_plugin_instances(
            SourceSpec { id: "source".to_string(), output_schema: schema() },
            Vec::new(),
            vec![SinkSpec { id: "sink".to_string(), input_schema: schema() }],
            Vec::new(),
            vec![GateSpec {
                id: "gate".to_string(),
                after: "source".to_string(),
                routes: vec![GateRoute { label: "missing".to_string(), destination: "nowhere".to_string(), mode: EdgeMode::Move }],
            }],
            Vec::new(),
            "sink",
        );
        assert!(matches!(result, Err(GraphError::UnknownDestination(_))));
    }

    #[test]
    fn gate_fork_routes_to_two_sinks_via_copy_edges() {
        let graph = GraphBuilder::from_plugin_instances(
            SourceSpec { id: "source".to_string(), output_schema: schema() },
            Vec::new(),
            vec![
                SinkSpec { id: "sink_a".to_string(), input_schema: schema() },
                SinkSpec { id: "sink_b".to_string(), input_schema: schema() },
            ],
            Vec::new(),
            vec![GateSpec {
                id: "gate".to_string(),
                after: "source".to_string(),
                routes: vec![
                    GateRoute { label: "a".to_string(), destination: "sink_a".to_string(), mode: EdgeMode::Copy },
                    GateRoute { label: "b".to_string(), destination: "sink_b".to_string(), mode: EdgeMode::Copy },
                ],
            }],
            Vec::new(),
            "sink_a",
        )
        .unwrap();
        assert!(graph.validate().is_ok());
        let routes = graph.outgoing_edges("gate");
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|edge| edge.mode == EdgeMode::Copy));
    }

    #[test]
    fn coalesce_without_incoming_edges_fails_validation() {
        let graph = Graph {
            nodes: vec![
                GraphNode::new("source", elspeth_core::NodeType::Source, schema(), schema()),
                GraphNode::new("join", elspeth_core::NodeType::Coalesce, schema(), schema()),
                GraphNode::new("sink", elspeth_core::NodeType::Sink, schema(), schema()),
            ],
            edges: vec![GraphEdge::new("source", "sink", CONTINUE_LABEL, EdgeMode::Move)],
            coalesce_branches: Default::default(),
        };
        assert!(matches!(graph.validate(), Err(GraphError::UnreachableNode(ref id)) if id == "join"));
    }

    #[test]
    fn schema_mismatch_between_nodes_is_rejected() {
        let strict = SchemaContract::fixed(vec![FieldSpec::required("missing_field", FieldType::Int)]);
        let graph = Graph {
            nodes: vec![
                GraphNode::new("source", elspeth_core::NodeType::Source, schema(), schema()),
                GraphNode::new("sink", elspeth_core::NodeType::Sink, strict, schema()),
            ],
            edges: vec![GraphEdge::new("source", "sink", CONTINUE_LABEL, EdgeMode::Move)],
            coalesce_branches: Default::default(),
        };
        assert!(matches!(graph.validate(), Err(GraphError::SchemaMismatch { .. })));
    }

    #[test]
    fn topology_hash_is_stable_across_equivalent_construction_order() {
        let graph_a = linear_graph();
        let graph_b = linear_graph();
        assert_eq!(graph_a.topology_hash().unwrap(), graph_b.topology_hash().unwrap());
    }

    #[test]
    fn topology_hash_changes_when_a_node_is_added() {
        let base = linear_graph();
        let mut extended = base.clone();
        extended.nodes.push(GraphNode::new("extra_sink", elspeth_core::NodeType::Sink, schema(), schema()));
        assert_ne!(base.topology_hash().unwrap(), extended.topology_hash().unwrap());
    }
}
