// crates/elspeth-graph/src/topology.rs
// ============================================================================
// Module: Topology Hash
// Description: A content hash over a graph's nodes, edges, and schemas.
// Purpose: Let resume (`spec.md` §4.10) detect a graph shape change between
// a checkpointed run and the graph it's about to resume into.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! [`Graph::topology_hash`] hashes a canonical, sort-stable listing of the
//! graph: nodes ordered by id, edges ordered by `(from, to, label)`, each
//! carrying its schema's canonical JSON. Two graphs built from differently
//! ordered specs but identical shape hash identically; any structural or
//! schema change changes the hash.

use elspeth_core::hashing::stable_hash;
use elspeth_core::HashDigest;
use serde::Serialize;

use crate::Graph;
use crate::GraphError;

#[derive(Serialize)]
struct NodeFingerprint<'a> {
    id: &'a str,
    node_type: elspeth_core::NodeType,
    input_schema: &'a elspeth_core::SchemaContract,
    output_schema: &'a elspeth_core::SchemaContract,
}

#[derive(Serialize)]
struct EdgeFingerprint<'a> {
    from: &'a str,
    to: &'a str,
    label: &'a str,
    mode: elspeth_core::EdgeMode,
}

#[derive(Serialize)]
struct GraphFingerprint<'a> {
    nodes: Vec<NodeFingerprint<'a>>,
    edges: Vec<EdgeFingerprint<'a>>,
}

impl Graph {
    /// Computes this graph's topology hash: a canonical digest over its
    /// nodes, edges, and schemas, independent of construction order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Hashing`] if canonical serialization fails,
    /// which only happens if a schema contains a non-finite float.
    pub fn topology_hash(&self) -> Result<HashDigest, GraphError> {
        let mut nodes: Vec<NodeFingerprint<'_>> = self
            .nodes
            .iter()
            .map(|node| NodeFingerprint {
                id: node.id.as_str(),
                node_type: node.node_type,
                input_schema: &node.input_schema,
                output_schema: &node.output_schema,
            })
            .collect();
        nodes.sort_by_key(|node| node.id);

        let mut edges: Vec<EdgeFingerprint<'_>> = self
            .edges
            .iter()
            .map(|edge| EdgeFingerprint {
                from: edge.from.as_str(),
                to: edge.to.as_str(),
                label: edge.label.as_str(),
                mode: edge.mode,
            })
            .collect();
        edges.sort_by(|left, right| (left.from, left.to, left.label).cmp(&(right.from, right.to, right.label)));

        stable_hash(&GraphFingerprint { nodes, edges }).map_err(GraphError::Hashing)
    }
}
