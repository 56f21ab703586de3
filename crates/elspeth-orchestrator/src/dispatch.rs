// crates/elspeth-orchestrator/src/dispatch.rs
// ============================================================================
// Module: Graph Walk Dispatcher
// Description: Drives a single token through the execution graph, node by
// node, writing every Landscape record the walk produces along the way.
// Purpose: `spec.md` §4.11 step 3: "walk graph from source (begin state,
// invoke plugin, route or enqueue)". This is that walk, factored out of
// `Orchestrator::run` so the five-step run procedure stays readable.
// Dependencies: elspeth-coalesce, elspeth-core, elspeth-gate, elspeth-graph,
// elspeth-landscape, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`Dispatcher`] owns the live node-id lookup tables a run needs (graph
//! node id -> persisted [`NodeId`]/[`EdgeId`]) and the mutable counters a
//! run accumulates (rows succeeded/failed). [`Dispatcher::dispatch`] pushes
//! one token onto an internal work queue and drains it to completion,
//! because a single hop can fan out into several continuations (a gate
//! fork, a batch transform producing zero or more output rows, an
//! aggregation emitting many rows from one `finalize`).
//!
//! Six node kinds, two dispatch strategies per [`NodeType::Transform`]
//! (row-at-a-time vs batch-aware — [`PipelinePlugins::transforms`]'s
//! [`TransformKind`] picks which), and the coalesce executor's own
//! self-contained recorder writes for [`AcceptOutcome::Merged`]/
//! [`AcceptOutcome::Failed`] (this dispatcher must not duplicate those).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use elspeth_coalesce::AcceptOutcome;
use elspeth_coalesce::CoalesceError;
use elspeth_core::hashing::hash_bytes;
use elspeth_core::hashing::stable_hash;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::Clock;
use elspeth_core::EdgeId;
use elspeth_core::EdgeMode;
use elspeth_core::HashError;
use elspeth_core::NodeId;
use elspeth_core::NodeType;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RunId;
use elspeth_core::SchemaValidationError;
use elspeth_core::Source;
use elspeth_core::TokenOutcomeKind;
use elspeth_gate::routing;
use elspeth_graph::Graph;
use elspeth_landscape::LandscapeError;
use elspeth_landscape::NodeStateCompletion;
use elspeth_landscape::Recorder;
use elspeth_landscape::RoutingEventInput;
use elspeth_landscape::TokenInfo;
use elspeth_landscape::TokenManager;

use crate::pipeline::PipelinePlugins;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the dispatcher cannot recover from by quarantining a row; these
/// indicate the audit trail itself, or the graph it describes, is broken.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A Landscape write failed.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// The coalesce executor rejected the arrival outright (an unknown
    /// coalesce name, or a duplicate branch arrival) — a graph-construction
    /// or replay bug, not a row-level failure.
    #[error(transparent)]
    Coalesce(#[from] CoalesceError),
    /// Hashing a row or context value failed.
    #[error(transparent)]
    Hashing(#[from] HashError),
    /// The walk reached a graph node id with no registered `NodeId`,
    /// meaning step 2 of `Orchestrator::run` never registered it.
    #[error("node {0} was never registered with the recorder")]
    UnregisteredNode(String),
    /// The walk tried to route along an edge the graph never declared.
    #[error("no edge from {from} labeled {label}")]
    UnknownEdge {
        /// Originating graph node id.
        from: String,
        /// The edge label that had no match.
        label: String,
    },
    /// A graph node id had no matching plugin instance in `PipelinePlugins`.
    #[error("no plugin instance registered for node {0}")]
    MissingPlugin(String),
    /// An aggregation's `finalize` failed. There is no single token to
    /// attribute this to (finalize spans every row the batch consumed), so
    /// it fails the run rather than quarantining a row.
    #[error("aggregation {node} failed to finalize: {detail}")]
    AggregationFinalize {
        /// The aggregation node id.
        node: String,
        /// The underlying failure.
        detail: String,
    },
    /// A batch-aware transform failed to drain its in-flight rows before
    /// the run moved on to finalization.
    #[error("batch transform {node} failed to flush: {detail}")]
    BatchFlush {
        /// The transform node id.
        node: String,
        /// The underlying failure.
        detail: String,
    },
}

// ============================================================================
// SECTION: Node and edge id tables
// ============================================================================

/// Maps graph node ids (and `(from, label)` edge pairs) to the identifiers
/// the recorder assigned during `Orchestrator::run` step 2.
#[derive(Debug, Default)]
pub struct RegisteredIds {
    /// Graph node id -> persisted `NodeId`.
    pub nodes: BTreeMap<String, NodeId>,
    /// `(from graph node id, edge label)` -> persisted `EdgeId`.
    pub edges: BTreeMap<(String, String), EdgeId>,
}

// ============================================================================
// SECTION: Work item
// ============================================================================

struct WorkItem {
    node_id: String,
    token: TokenInfo,
    step_index: u32,
    /// The branch name this token arrived under, if the edge it traveled
    /// was labeled (used only by coalesce dispatch).
    arrived_via_label: String,
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Drives tokens through the graph from a given entry edge to a terminal
/// outcome (sink write, quarantine, or a non-terminal hold such as a
/// buffered coalesce arrival or a batch-transform submission still
/// in flight).
pub struct Dispatcher<'a> {
    graph: &'a Graph,
    plugins: &'a mut PipelinePlugins,
    ids: &'a RegisteredIds,
    recorder: Arc<Recorder>,
    token_manager: Arc<TokenManager>,
    clock: Arc<dyn Clock>,
    run_id: RunId,
    queue: VecDeque<WorkItem>,
    /// Rows whose token(s) reached a `completed` terminal outcome.
    pub rows_succeeded: u64,
    /// Rows whose token(s) reached a `failed` terminal outcome.
    pub rows_failed: u64,
}

impl<'a> Dispatcher<'a> {
    /// Builds a dispatcher for one run.
    #[must_use]
    pub fn new(
        graph: &'a Graph,
        plugins: &'a mut PipelinePlugins,
        ids: &'a RegisteredIds,
        recorder: Arc<Recorder>,
        token_manager: Arc<TokenManager>,
        clock: Arc<dyn Clock>,
        run_id: RunId,
    ) -> Self {
        Self {
            graph,
            plugins,
            ids,
            recorder,
            token_manager,
            clock,
            run_id,
            queue: VecDeque::new(),
            rows_succeeded: 0,
            rows_failed: 0,
        }
    }

    /// Walks `token` from `entry_node_id` (the source node it was created
    /// against) along the source's `on_success` edge, to completion.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when a Landscape write fails, the graph is
    /// missing a node/edge the walk needed, or a plugin instance is absent.
    /// Plugin-level failures (schema rejection, `TransformError`,
    /// `GateError`, ...) are not propagated as `Err`: they quarantine the
    /// row and record a `failed` terminal outcome instead.
    pub fn dispatch(&mut self, entry_node_id: &str, token: TokenInfo, step_index: u32) -> Result<(), DispatchError> {
        let entry_id = self.node_id_for(entry_node_id)?;
        let label = self.source_on_success().to_string();
        self.continue_along(entry_node_id, &entry_id, token, &label, step_index)?;
        self.drain()
    }

    /// Drains any already-enqueued continuations (batch settlements
    /// dispatched from [`crate::orchestrator`] after draining a
    /// [`crate::pipeline::BatchChannel`]) without seeding a new entry.
    pub fn enqueue(&mut self, node_id: &str, token: TokenInfo, step_index: u32, arrived_via_label: String) {
        self.queue.push_back(WorkItem { node_id: node_id.to_string(), token, step_index, arrived_via_label });
    }

    /// Runs the work queue to empty.
    ///
    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn drain(&mut self) -> Result<(), DispatchError> {
        while let Some(item) = self.queue.pop_front() {
            self.step(item)?;
        }
        Ok(())
    }

    fn node_id_for(&self, graph_node_id: &str) -> Result<NodeId, DispatchError> {
        self.ids.nodes.get(graph_node_id).cloned().ok_or_else(|| DispatchError::UnregisteredNode(graph_node_id.to_string()))
    }

    fn edge_id_for(&self, from: &str, label: &str) -> Result<EdgeId, DispatchError> {
        self.ids
            .edges
            .get(&(from.to_string(), label.to_string()))
            .cloned()
            .ok_or_else(|| DispatchError::UnknownEdge { from: from.to_string(), label: label.to_string() })
    }

    fn ctx<'c>(&'c self, node_id: &'c NodeId) -> PluginContext<'c> {
        PluginContext { run_id: &self.run_id, node_id, clock: self.clock.as_ref(), calls: None }
    }

    /// Quarantines `token` at `node_id` for a schema-contract violation,
    /// recording a `validation_errors` row and a `failed` terminal outcome.
    fn quarantine_schema_violation(&mut self, node_id: &NodeId, token: &TokenInfo, error: SchemaValidationError) -> Result<(), DispatchError> {
        let row_hash = stable_hash(&token.row_data)?;
        let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
        self.recorder.record_validation_error(&self.run_id, node_id, row_hash, &token.row_data, error_json)?;
        self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Quarantined, None)?;
        self.rows_failed += 1;
        Ok(())
    }

    fn step(&mut self, item: WorkItem) -> Result<(), DispatchError> {
        let graph_node_id = item.node_id;
        let node = self.graph.node(&graph_node_id).ok_or_else(|| DispatchError::UnregisteredNode(graph_node_id.clone()))?.clone();
        let node_id = self.node_id_for(&graph_node_id)?;

        if !matches!(node.node_type, NodeType::Coalesce) {
            if let Err(error) = node.input_schema.validate(&item.token.row_data) {
                self.quarantine_schema_violation(&node_id, &item.token, error)?;
                return Ok(());
            }
        }

        match node.node_type {
            NodeType::Source => Err(DispatchError::UnregisteredNode(format!("source node {graph_node_id} is not a dispatch target"))),
            NodeType::Transform => self.step_transform(&graph_node_id, &node_id, item.token, item.step_index),
            NodeType::Gate => self.step_gate(&graph_node_id, &node_id, item.token, item.step_index),
            NodeType::Aggregation => self.step_aggregation(&graph_node_id, &node_id, item.token, item.step_index),
            NodeType::Coalesce => self.step_coalesce(&graph_node_id, &node_id, item.token, item.arrived_via_label, item.step_index),
            NodeType::Sink => self.step_sink(&graph_node_id, &node_id, item.token, item.step_index),
        }
    }

    // ------------------------------------------------------------------
    // Transform
    // ------------------------------------------------------------------

    fn step_transform(&mut self, graph_node_id: &str, node_id: &NodeId, token: TokenInfo, step_index: u32) -> Result<(), DispatchError> {
        let input_hash = stable_hash(&token.row_data)?;
        let Some(kind) = self.plugins.transforms.get_mut(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };

        match kind {
            crate::pipeline::TransformKind::RowAtATime(transform) => {
                let state = self.recorder.begin_node_state(&self.run_id, &token.token_id, node_id, step_index, 0, input_hash)?;
                let ctx = self.ctx(node_id);
                let outcome = transform.process(token.row_data.clone(), &ctx);
                match outcome {
                    Ok(result) => self.finish_row_transform(graph_node_id, node_id, &state.state_id, token, step_index, result)?,
                    Err(error) => {
                        let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
                        self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                        self.fail_transform_row(node_id, token, error_json)?;
                    }
                }
                Ok(())
            }
            crate::pipeline::TransformKind::Batch(adapter, channel) => {
                let state = self.recorder.begin_node_state(&self.run_id, &token.token_id, node_id, step_index, 0, input_hash)?;
                let ctx = self.ctx(node_id);
                let submission_index = channel.reserve_submission_index();
                channel.track(submission_index, token.clone(), state.state_id.clone(), step_index);
                match adapter.accept(token.row_data.clone(), &ctx) {
                    Ok(()) => Ok(()),
                    Err(error) => {
                        channel.forget(submission_index);
                        let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
                        self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                        self.fail_transform_row(node_id, token, error_json)
                    }
                }
            }
        }
    }

    fn finish_row_transform(
        &mut self,
        graph_node_id: &str,
        node_id: &NodeId,
        state_id: &elspeth_core::StateId,
        token: TokenInfo,
        step_index: u32,
        result: elspeth_core::TransformResult,
    ) -> Result<(), DispatchError> {
        match result.status {
            elspeth_core::TransformStatus::Rejected { reason } => {
                let error_json = serde_json::json!({ "error": reason }).to_string();
                self.recorder.complete_node_state(state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                self.fail_transform_row(node_id, token, error_json)
            }
            elspeth_core::TransformStatus::Success { success_reason } => {
                let label = success_reason.unwrap_or_else(|| elspeth_graph::CONTINUE_LABEL.to_string());
                match result.rows.len() {
                    0 => {
                        let output_hash = stable_hash(&RowData::new())?;
                        self.recorder.complete_node_state(
                            state_id,
                            NodeStateCompletion::Completed { output_hash, context_after_json: None },
                        )?;
                        self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Routed, None)?;
                        Ok(())
                    }
                    1 => {
                        let mut continued = token;
                        continued.row_data = result.rows.into_iter().next().unwrap_or_else(RowData::new);
                        let output_hash = stable_hash(&continued.row_data)?;
                        self.recorder.complete_node_state(
                            state_id,
                            NodeStateCompletion::Completed { output_hash, context_after_json: None },
                        )?;
                        self.continue_along(graph_node_id, node_id, continued, &label, step_index)
                    }
                    count => {
                        let output_hash = stable_hash(&token.row_data)?;
                        self.recorder.complete_node_state(
                            state_id,
                            NodeStateCompletion::Completed { output_hash, context_after_json: None },
                        )?;
                        let children = self.token_manager.expand(&token, u32::try_from(count).unwrap_or(u32::MAX), step_index + 1)?;
                        self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Expanded, None)?;
                        for (child, row) in children.into_iter().zip(result.rows) {
                            let mut child = child;
                            child.row_data = row;
                            self.continue_along(graph_node_id, node_id, child, &label, step_index + 1)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    fn fail_transform_row(&mut self, node_id: &NodeId, token: TokenInfo, error_json: String) -> Result<(), DispatchError> {
        if let Some(error_sink) = self.plugins.error_sink.clone() {
            self.route_to_named_sink(&error_sink, token)
        } else {
            self.recorder.record_transform_error(&self.run_id, &token.token_id, node_id, &token.row_data, error_json)?;
            self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Failed, None)?;
            self.rows_failed += 1;
            Ok(())
        }
    }

    fn route_to_named_sink(&mut self, sink_node_id: &str, token: TokenInfo) -> Result<(), DispatchError> {
        let node_id = self.node_id_for(sink_node_id)?;
        self.step_sink(sink_node_id, &node_id, token, 0)
    }

    /// Drains every currently-settled result off `graph_node_id`'s batch
    /// channel, completes the node state each was opened under, and
    /// continues (or fails) the walk for each. Called by
    /// [`crate::orchestrator`] after every `accept` and again during the
    /// final flush.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub fn drain_batch_settlements(&mut self, graph_node_id: &str) -> Result<(), DispatchError> {
        let node_id = self.node_id_for(graph_node_id)?;
        let settlements = {
            let Some(crate::pipeline::TransformKind::Batch(_, channel)) = self.plugins.transforms.get(graph_node_id) else {
                return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
            };
            channel.drain_settled()
        };
        for (token, state_id, step_index, result) in settlements {
            match result.outcome {
                Ok(row_data) => {
                    let mut continued = token;
                    continued.row_data = row_data;
                    let output_hash = stable_hash(&continued.row_data)?;
                    self.recorder.complete_node_state(&state_id, NodeStateCompletion::Completed { output_hash, context_after_json: None })?;
                    self.continue_along(graph_node_id, &node_id, continued, elspeth_graph::CONTINUE_LABEL, step_index)?;
                }
                Err(message) => {
                    let error_json = serde_json::json!({ "error": message }).to_string();
                    self.recorder.complete_node_state(&state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                    self.fail_transform_row(&node_id, token, error_json)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Gate
    // ------------------------------------------------------------------

    fn step_gate(&mut self, graph_node_id: &str, node_id: &NodeId, token: TokenInfo, step_index: u32) -> Result<(), DispatchError> {
        let input_hash = stable_hash(&token.row_data)?;
        let Some(gate) = self.plugins.gates.get(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };
        let state = self.recorder.begin_node_state(&self.run_id, &token.token_id, node_id, step_index, 0, input_hash)?;
        let ctx = self.ctx(node_id);
        let decision = gate.decide(&token.row_data, &ctx);

        let action = match decision {
            Ok(action) => action,
            Err(error) => {
                let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
                self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Failed { error_json })?;
                self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Quarantined, None)?;
                self.rows_failed += 1;
                return Ok(());
            }
        };

        // `RoutingAction` carries no `Serialize` impl (it is a live decision,
        // not an audit record); its `Debug` rendering is what gets hashed as
        // the routing reason.
        let reason_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, format!("{action:?}").as_bytes());
        let destinations = routing::resolve(&action, elspeth_graph::CONTINUE_LABEL);
        let output_hash = stable_hash(&token.row_data)?;
        self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Completed { output_hash, context_after_json: None })?;

        if destinations.is_empty() {
            // `RoutingAction::Reject`.
            self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Routed, None)?;
            self.rows_failed += 1;
            return Ok(());
        }

        let mut events = Vec::with_capacity(destinations.len());
        for destination in &destinations {
            let edge_id = self.edge_id_for(graph_node_id, &destination.label)?;
            events.push(RoutingEventInput { edge_id, mode: destination.mode, reason_hash: reason_hash.clone() });
        }
        self.recorder.record_routing_events(&state.state_id, &events)?;

        if destinations.len() == 1 && destinations[0].mode == EdgeMode::Move {
            let label = destinations[0].label.clone();
            self.continue_along(graph_node_id, node_id, token, &label, step_index)
        } else {
            let branches: Vec<String> = destinations.iter().map(|destination| destination.label.clone()).collect();
            let children = self.token_manager.fork_token(&token, &branches, step_index + 1)?;
            self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Forked, None)?;
            for (child, destination) in children.into_iter().zip(destinations) {
                self.continue_along(graph_node_id, node_id, child, &destination.label, step_index + 1)?;
            }
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    fn step_aggregation(&mut self, graph_node_id: &str, node_id: &NodeId, token: TokenInfo, step_index: u32) -> Result<(), DispatchError> {
        let input_hash = stable_hash(&token.row_data)?;
        let Some(aggregation) = self.plugins.aggregations.get_mut(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };
        let state = self.recorder.begin_node_state(&self.run_id, &token.token_id, node_id, step_index, 0, input_hash)?;
        let ctx = self.ctx(node_id);
        match aggregation.accept(token.row_data.clone(), &ctx) {
            Ok(()) => {
                let output_hash = stable_hash(&token.row_data)?;
                self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Completed { output_hash, context_after_json: None })?;
                self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::ConsumedInBatch, None)?;
                Ok(())
            }
            Err(error) => {
                let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
                self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                self.recorder.record_transform_error(&self.run_id, &token.token_id, node_id, &token.row_data, error_json)?;
                self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Failed, None)?;
                self.rows_failed += 1;
                Ok(())
            }
        }
    }

    /// Finalizes an aggregation node, minting a fresh initial token per
    /// emitted row and continuing the walk for each along the node's
    /// single outgoing edge. Called by [`crate::orchestrator`] once the
    /// source is exhausted.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub fn finalize_aggregation(&mut self, graph_node_id: &str, node_id: &NodeId, step_index: u32) -> Result<(), DispatchError> {
        let Some(aggregation) = self.plugins.aggregations.get_mut(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };
        let ctx = self.ctx(node_id);
        let rows = aggregation
            .finalize(&ctx)
            .map_err(|error| DispatchError::AggregationFinalize { node: graph_node_id.to_string(), detail: error.to_string() })?;
        for (index, row) in rows.into_iter().enumerate() {
            let initial = self.token_manager.create_initial_token(&self.run_id, row, node_id, index as u64)?;
            self.continue_along(graph_node_id, node_id, initial, elspeth_graph::CONTINUE_LABEL, step_index)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coalesce
    // ------------------------------------------------------------------

    fn step_coalesce(
        &mut self,
        graph_node_id: &str,
        node_id: &NodeId,
        token: TokenInfo,
        arrived_via_label: String,
        step_index: u32,
    ) -> Result<(), DispatchError> {
        let outcome = self.plugins.coalesce_executor.accept(&self.run_id, node_id, graph_node_id, &token, &arrived_via_label, step_index)?;
        match outcome {
            AcceptOutcome::Buffered => Ok(()),
            AcceptOutcome::Merged { token: merged } => self.continue_along(graph_node_id, node_id, merged, elspeth_graph::CONTINUE_LABEL, step_index + 1),
            AcceptOutcome::Failed { .. } => {
                self.rows_failed += 1;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Sink
    // ------------------------------------------------------------------

    fn step_sink(&mut self, graph_node_id: &str, node_id: &NodeId, token: TokenInfo, step_index: u32) -> Result<(), DispatchError> {
        let input_hash = stable_hash(&token.row_data)?;
        let Some(sink) = self.plugins.sinks.get_mut(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };
        let state = self.recorder.begin_node_state(&self.run_id, &token.token_id, node_id, step_index, 0, input_hash)?;
        let ctx = self.ctx(node_id);
        match sink.write(std::slice::from_ref(&token.row_data), &ctx) {
            Ok(descriptor) => {
                let output_hash = stable_hash(&descriptor.uri)?;
                self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Completed { output_hash, context_after_json: None })?;
                self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Completed, None)?;
                self.rows_succeeded += 1;
                Ok(())
            }
            Err(error) => {
                let error_json = serde_json::json!({ "error": error.to_string() }).to_string();
                self.recorder.complete_node_state(&state.state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
                self.recorder.record_transform_error(&self.run_id, &token.token_id, node_id, &token.row_data, error_json)?;
                self.recorder.record_token_outcome(&token.token_id, &self.run_id, TokenOutcomeKind::Failed, None)?;
                self.rows_failed += 1;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Orchestrator-facing accessors (steps 3 and 4 of `Orchestrator::run`)
    // ------------------------------------------------------------------

    /// The graph node id of the source this dispatcher's plugins were
    /// wired for.
    #[must_use]
    pub fn source_node_id(&self) -> &str {
        &self.plugins.source_node_id
    }

    /// The source's declared default outgoing edge label.
    #[must_use]
    pub fn source_on_success(&self) -> &str {
        self.plugins.source.on_success()
    }

    /// Mutable access to the source plugin, for `Orchestrator::run`'s
    /// `next_row` polling loop.
    pub fn source_mut(&mut self) -> &mut dyn Source {
        self.plugins.source.as_mut()
    }

    /// Every graph node id backed by a [`crate::pipeline::TransformKind::Batch`].
    #[must_use]
    pub fn batch_transform_node_ids(&self) -> Vec<String> {
        self.plugins
            .transforms
            .iter()
            .filter(|(_, kind)| matches!(kind, crate::pipeline::TransformKind::Batch(..)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every graph node id backed by an [`elspeth_core::Aggregation`].
    #[must_use]
    pub fn aggregation_node_ids(&self) -> Vec<String> {
        self.plugins.aggregations.keys().cloned().collect()
    }

    /// Flushes `graph_node_id`'s batch-aware transform, waiting up to
    /// `timeout` for in-flight rows to settle. Does not itself drain the
    /// settlements; call [`Self::drain_batch_settlements`] afterward.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BatchFlush`] if the adapter times out or
    /// otherwise fails to drain, or [`DispatchError::MissingPlugin`] if
    /// `graph_node_id` names no batch transform.
    pub fn flush_batch_transform(&mut self, graph_node_id: &str, timeout: Duration) -> Result<(), DispatchError> {
        let Some(crate::pipeline::TransformKind::Batch(adapter, _)) = self.plugins.transforms.get_mut(graph_node_id) else {
            return Err(DispatchError::MissingPlugin(graph_node_id.to_string()));
        };
        adapter
            .flush_batch_processing(timeout)
            .map_err(|error| DispatchError::BatchFlush { node: graph_node_id.to_string(), detail: error.to_string() })
    }

    /// Finalizes `graph_node_id`'s aggregation by graph node id, looking up
    /// its persisted `NodeId` internally. See [`Self::finalize_aggregation`].
    ///
    /// # Errors
    ///
    /// See [`Self::finalize_aggregation`].
    pub fn finalize_aggregation_by_id(&mut self, graph_node_id: &str, step_index: u32) -> Result<(), DispatchError> {
        let node_id = self.node_id_for(graph_node_id)?;
        self.finalize_aggregation(graph_node_id, &node_id, step_index)
    }

    /// Flushes every coalesce node's pending (incomplete) arrivals at
    /// run end. Merged outcomes continue the walk from the coalesce node;
    /// failed outcomes were already recorded by the executor itself and
    /// only need their row counted here.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub fn flush_coalesce(&mut self, step_index: u32) -> Result<(), DispatchError> {
        let run_id = self.run_id.clone();
        let outcomes = self.plugins.coalesce_executor.flush_pending(&run_id)?;
        for (coalesce_name, _row_id, outcome) in outcomes {
            match outcome {
                AcceptOutcome::Merged { token } => {
                    let node_id = self.node_id_for(&coalesce_name)?;
                    self.continue_along(&coalesce_name, &node_id, token, elspeth_graph::CONTINUE_LABEL, step_index)?;
                }
                AcceptOutcome::Failed { .. } => {
                    self.rows_failed += 1;
                }
                AcceptOutcome::Buffered => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared continuation
    // ------------------------------------------------------------------

    fn continue_along(&mut self, graph_node_id: &str, _from_node_id: &NodeId, token: TokenInfo, label: &str, step_index: u32) -> Result<(), DispatchError> {
        let edge = self
            .graph
            .outgoing_edges(graph_node_id)
            .into_iter()
            .find(|edge| edge.label == label)
            .ok_or_else(|| DispatchError::UnknownEdge { from: graph_node_id.to_string(), label: label.to_string() })?;
        self.queue.push_back(WorkItem {
            node_id: edge.to.clone(),
            token,
            step_index: step_index + 1,
            arrived_via_label: edge.label.clone(),
        });
        Ok(())
    }
}
