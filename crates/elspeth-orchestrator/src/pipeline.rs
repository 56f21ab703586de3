// crates/elspeth-orchestrator/src/pipeline.rs
// ============================================================================
// Module: Pipeline Plugins
// Description: The concrete, constructed plugin instances an `Orchestrator`
// drives, keyed by the graph node id each was built for.
// Purpose: Separate "what graph shape is this run" (`elspeth_graph::Graph`)
// from "which live plugin instance backs each node" — the orchestrator walks
// the former and dispatches into the latter.
// Dependencies: elspeth-core, elspeth-coalesce, elspeth-gate
// ============================================================================

//! ## Overview
//! A node's [`elspeth_graph::node::GraphNode::node_type`] says what *kind*
//! of node it is; `PipelinePlugins` is where the orchestrator looks up the
//! live instance that actually runs for a given node id. Transform nodes
//! come in two flavors — [`TransformKind::RowAtATime`] for a plain
//! [`elspeth_core::Transform`], [`TransformKind::Batch`] for a worker-pool
//! pipelined [`elspeth_core::BatchTransform`] (`spec.md` §4.7) — because the
//! orchestrator's dispatch loop drives each differently: a batch-aware
//! transform's `accept` doesn't hand back its result inline, so settled rows
//! are collected off a shared [`BatchChannel`] instead.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_coalesce::CoalesceExecutor;
use elspeth_core::Aggregation;
use elspeth_core::BatchResult;
use elspeth_core::BatchTransform;
use elspeth_core::Determinism;
use elspeth_core::Gate;
use elspeth_core::HashDigest;
use elspeth_core::OutputPort;
use elspeth_core::Sink;
use elspeth_core::Source;
use elspeth_core::StateId;
use elspeth_core::Transform;
use elspeth_landscape::TokenInfo;

// ============================================================================
// SECTION: Batch channel
// ============================================================================

/// The output port a [`TransformKind::Batch`] node's adapter emits settled
/// results through, plus the originating [`TokenInfo`] for each submission
/// index so the orchestrator can resume the graph walk once a row settles.
pub struct BatchChannel {
    settled: Arc<Mutex<VecDeque<BatchResult>>>,
    originating: Mutex<BTreeMap<u64, (TokenInfo, StateId, u32)>>,
    next_index: Mutex<u64>,
}

impl BatchChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settled: Arc::new(Mutex::new(VecDeque::new())),
            originating: Mutex::new(BTreeMap::new()),
            next_index: Mutex::new(0),
        }
    }

    /// Builds the [`OutputPort`] to connect to a batch adapter via
    /// `BatchTransform::connect_output`.
    #[must_use]
    pub fn port(&self) -> Box<dyn OutputPort> {
        Box::new(CollectorPort {
            settled: Arc::clone(&self.settled),
        })
    }

    /// Reserves the next submission index. Must be called exactly once per
    /// `BatchTransform::accept` call, immediately before it, so the index
    /// assigned here matches the index the adapter assigns internally.
    pub fn reserve_submission_index(&self) -> u64 {
        let mut next = self.next_index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let index = *next;
        *next += 1;
        index
    }

    /// Records which token, node-state, and step index a submission index
    /// belongs to, so a later settled result can be matched back to its
    /// originating row, the node state it opened can be completed, and the
    /// walk can continue at the right step.
    pub fn track(&self, submission_index: u64, token: TokenInfo, state_id: StateId, step_index: u32) {
        let mut originating = self.originating.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        originating.insert(submission_index, (token, state_id, step_index));
    }

    /// Drops a reserved index's tracking entry when its submission was
    /// rejected outright and will never settle.
    pub fn forget(&self, submission_index: u64) {
        let mut originating = self.originating.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        originating.remove(&submission_index);
    }

    /// Drains every settled result currently buffered, paired with the
    /// token, node-state, and step index it was submitted under.
    #[must_use]
    pub fn drain_settled(&self) -> Vec<(TokenInfo, StateId, u32, BatchResult)> {
        let mut settled = self.settled.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut originating = self.originating.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        settled
            .drain(..)
            .filter_map(|result| originating.remove(&result.submission_index).map(|(token, state_id, step_index)| (token, state_id, step_index, result)))
            .collect()
    }
}

impl Default for BatchChannel {
    fn default() -> Self {
        Self::new()
    }
}

struct CollectorPort {
    settled: Arc<Mutex<VecDeque<BatchResult>>>,
}

impl OutputPort for CollectorPort {
    fn emit(&self, result: BatchResult) {
        let mut settled = self.settled.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        settled.push_back(result);
    }
}

// ============================================================================
// SECTION: Transform kind
// ============================================================================

/// Either flavor of transform node the orchestrator can dispatch into.
pub enum TransformKind {
    /// A plain row-at-a-time [`Transform`].
    RowAtATime(Box<dyn Transform>),
    /// A worker-pool pipelined [`BatchTransform`], plus the channel its
    /// settled results flow back through.
    Batch(Box<dyn BatchTransform>, BatchChannel),
}

// ============================================================================
// SECTION: Node descriptor
// ============================================================================

/// The plugin-identity metadata `Recorder::register_node` needs for a
/// node, but which `elspeth_graph::GraphNode` does not carry (the graph
/// only describes topology and schema, not which concrete plugin backs a
/// node or what it was configured with).
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    /// The plugin's registry name (e.g. `"inline_source"`).
    pub plugin_name: String,
    /// The plugin's declared version.
    pub plugin_version: String,
    /// The plugin's declared determinism class.
    pub determinism: Determinism,
    /// Canonical hash of the plugin's own configuration.
    pub config_hash: HashDigest,
    /// This node's position in the graph, if meaningful (source = `0`).
    pub position: Option<u32>,
}

// ============================================================================
// SECTION: Pipeline plugins
// ============================================================================

/// The live plugin instances a run drives, keyed by graph node id.
pub struct PipelinePlugins {
    /// The graph node id of the source.
    pub source_node_id: String,
    /// The source instance (swapped for [`elspeth_checkpoint::NullSource`]
    /// on resume).
    pub source: Box<dyn Source>,
    /// Transform node id -> instance.
    pub transforms: BTreeMap<String, TransformKind>,
    /// Gate node id -> instance.
    pub gates: BTreeMap<String, Box<dyn Gate>>,
    /// Aggregation node id -> instance.
    pub aggregations: BTreeMap<String, Box<dyn Aggregation>>,
    /// Sink node id -> instance.
    pub sinks: BTreeMap<String, Box<dyn Sink>>,
    /// The single executor serving every coalesce node in the graph,
    /// keyed internally by coalesce name (== node id, by convention, same
    /// as [`elspeth_graph::builder::CoalesceSpec::id`]).
    pub coalesce_executor: Arc<CoalesceExecutor>,
    /// The sink node id transform errors route to, if configured; absent
    /// means a transform error fails the row outright.
    pub error_sink: Option<String>,
    /// Every graph node id's registration metadata, including the
    /// source's and every coalesce node's.
    pub descriptors: BTreeMap<String, NodeDescriptor>,
}
