// crates/elspeth-graph/src/builder.rs
// ============================================================================
// Module: Graph Builder
// Description: Assembles a `Graph` from declarative node specs, wiring the
// implicit `continue` chain and explicit gate/aggregation/coalesce edges.
// Purpose: Implement `spec.md` §4.5's six-step construction process:
// source, transforms, gates, aggregations, coalesce nodes, sinks.
// Dependencies: elspeth-core, crate::node
// ============================================================================

//! ## Overview
//! The builder takes one spec per node plus the explicit wiring a plugin
//! instance alone can't supply (a gate's routes, an aggregation's upstream
//! and emit targets, a coalesce node's branch set). It never infers wiring
//! from node order beyond the one place `spec.md` says to: transforms chain
//! pairwise on the reserved `"continue"` label unless a gate or aggregation
//! intercepts that label first.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use elspeth_core::EdgeMode;
use elspeth_core::NodeType;
use elspeth_core::SchemaContract;

use crate::node::CONTINUE_LABEL;
use crate::node::GraphEdge;
use crate::node::GraphNode;
use crate::GraphError;
use crate::Graph;

/// The source node spec: exactly one per graph.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Node id.
    pub id: String,
    /// Schema the source guarantees on emitted rows.
    pub output_schema: SchemaContract,
}

/// A transform node spec. Transforms chain pairwise on `"continue"` in the
/// order given to [`GraphBuilder::from_plugin_instances`], unless a
/// [`GateSpec`] or [`AggregationSpec`] intercepts a given node's outgoing
/// `"continue"` edge.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    /// Node id.
    pub id: String,
    /// Schema this transform requires on incoming rows.
    pub input_schema: SchemaContract,
    /// Schema this transform guarantees on outgoing rows.
    pub output_schema: SchemaContract,
}

/// One `label -> destination` route materialized from a gate's resolved
/// actions (see `elspeth_gate::routing::resolve`).
#[derive(Debug, Clone)]
pub struct GateRoute {
    /// Edge label (a route name or `"continue"`).
    pub label: String,
    /// Destination node id; must name a transform, sink, aggregation, or
    /// coalesce node declared elsewhere in the same builder call.
    pub destination: String,
    /// `Move` for a single destination, `Copy` for a fan-out branch.
    pub mode: EdgeMode,
}

/// A gate node spec, inserted after a named upstream node.
#[derive(Debug, Clone)]
pub struct GateSpec {
    /// Node id.
    pub id: String,
    /// The node whose outgoing `"continue"` edge this gate intercepts.
    pub after: String,
    /// This gate's resolved routes.
    pub routes: Vec<GateRoute>,
}

/// An aggregation node spec, inserted between an upstream node and an emit
/// target.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    /// Node id.
    pub id: String,
    /// The node whose outgoing `"continue"` edge this aggregation
    /// intercepts.
    pub upstream: String,
    /// Schema required on accepted rows.
    pub input_schema: SchemaContract,
    /// Schema guaranteed on the finalized emission.
    pub output_schema: SchemaContract,
    /// Destination node id the finalized aggregate is emitted to.
    pub emit_to: String,
}

/// A named coalesce node spec. Branch edges targeting it are declared
/// elsewhere (as a gate route or transform chain entry naming this node as
/// `destination`/next); [`Graph::validate`] checks the declared branch set
/// matches the incoming edge labels actually present.
#[derive(Debug, Clone)]
pub struct CoalesceSpec {
    /// Node id (also the coalesce's name in `spec.md` §4.8).
    pub id: String,
    /// Branch labels this coalesce expects one incoming edge per.
    pub branches: Vec<String>,
    /// Schema guaranteed on the merged row.
    pub output_schema: SchemaContract,
    /// Destination node id the merged row is emitted to.
    pub emit_to: String,
}

/// A sink node spec.
#[derive(Debug, Clone)]
pub struct SinkSpec {
    /// Node id.
    pub id: String,
    /// Schema this sink requires on written rows.
    pub input_schema: SchemaContract,
}

/// Builds an execution graph from declarative node specs.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl GraphBuilder {
    /// Assembles a [`Graph`] from one spec per node kind, per `spec.md`
    /// §4.5's six-step construction process.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNodeId`] if two specs share an id, or
    /// [`GraphError::UnknownDestination`] if a gate route, aggregation emit
    /// target, or coalesce emit target names a node not present among the
    /// specs given.
    #[allow(clippy::too_many_arguments, reason = "one parameter per node kind mirrors spec.md \u{a7}4.5's six-step construction process")]
    pub fn from_plugin_instances(
        source: SourceSpec,
        transforms: Vec<TransformSpec>,
        sinks: Vec<SinkSpec>,
        aggregations: Vec<AggregationSpec>,
        gates: Vec<GateSpec>,
        coalesce_settings: Vec<CoalesceSpec>,
        default_sink: &str,
    ) -> Result<Graph, GraphError> {
        let mut builder = Self::default();
        let coalesce_branches: BTreeMap<String, BTreeSet<String>> = coalesce_settings
            .iter()
            .map(|coalesce| (coalesce.id.clone(), coalesce.branches.iter().cloned().collect()))
            .collect();

        builder.add_node(GraphNode::new(
            source.id.clone(),
            NodeType::Source,
            SchemaContract::open(elspeth_core::SchemaMode::Dynamic),
            source.output_schema,
        ))?;

        let mut chain_tail = source.id.clone();
        for transform in transforms {
            builder.add_edge(GraphEdge::new(chain_tail.clone(), transform.id.clone(), CONTINUE_LABEL, EdgeMode::Move));
            builder.add_node(GraphNode::new(transform.id.clone(), NodeType::Transform, transform.input_schema, transform.output_schema))?;
            chain_tail = transform.id;
        }

        for aggregation in &aggregations {
            builder.add_node(GraphNode::new(
                aggregation.id.clone(),
                NodeType::Aggregation,
                aggregation.input_schema.clone(),
                aggregation.output_schema.clone(),
            ))?;
        }
        for coalesce in &coalesce_settings {
            builder.add_node(GraphNode::new(
                coalesce.id.clone(),
                NodeType::Coalesce,
                SchemaContract::open(elspeth_core::SchemaMode::Dynamic),
                coalesce.output_schema.clone(),
            ))?;
        }
        for sink in &sinks {
            builder.add_node(GraphNode::new(sink.id.clone(), NodeType::Sink, sink.input_schema.clone(), SchemaContract::open(elspeth_core::SchemaMode::Dynamic)))?;
        }

        for aggregation in aggregations {
            builder.intercept_continue(&aggregation.upstream, &aggregation.id);
            builder.add_edge(GraphEdge::new(aggregation.id, aggregation.emit_to, CONTINUE_LABEL, EdgeMode::Move));
        }

        for coalesce in coalesce_settings {
            builder.add_edge(GraphEdge::new(coalesce.id, coalesce.emit_to, CONTINUE_LABEL, EdgeMode::Move));
        }

        for gate in gates {
            builder.intercept_continue(&gate.after, &gate.id);
            builder.add_node(GraphNode::new(
                gate.id.clone(),
                NodeType::Gate,
                SchemaContract::open(elspeth_core::SchemaMode::Dynamic),
                SchemaContract::open(elspeth_core::SchemaMode::Dynamic),
            ))?;
            for route in gate.routes {
                builder.add_edge(GraphEdge::new(gate.id.clone(), route.destination, route.label, route.mode));
            }
        }

        if !builder.edges.iter().any(|edge| edge.from == chain_tail && edge.label == CONTINUE_LABEL) {
            builder.add_edge(GraphEdge::new(chain_tail, default_sink, CONTINUE_LABEL, EdgeMode::Move));
        }

        let known_ids: BTreeSet<&str> = builder.nodes.iter().map(|node| node.id.as_str()).collect();
        for edge in &builder.edges {
            if !known_ids.contains(edge.to.as_str()) {
                return Err(GraphError::UnknownDestination(edge.to.clone()));
            }
        }

        Ok(Graph { nodes: builder.nodes, edges: builder.edges, coalesce_branches })
    }

    fn add_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.nodes.iter().any(|existing| existing.id == node.id) {
            return Err(GraphError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        self.edges.push(edge);
    }

    /// Removes `upstream`'s outgoing `"continue"` edge, if any, and rewires
    /// it to `replacement` instead, preserving the downstream target as
    /// `replacement`'s own outgoing edge is wired by the caller.
    fn intercept_continue(&mut self, upstream: &str, replacement: &str) {
        if let Some(index) = self.edges.iter().position(|edge| edge.from == upstream && edge.label == CONTINUE_LABEL) {
            self.edges.remove(index);
        }
        self.edges.push(GraphEdge::new(upstream, replacement, CONTINUE_LABEL, EdgeMode::Move));
    }
}
