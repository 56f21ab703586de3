// crates/elspeth-orchestrator/src/orchestrator.rs
// ============================================================================
// Module: Orchestrator
// Description: The end-to-end five-step run procedure `spec.md` §4.11
// describes, wiring graph, token manager, coalesce executor, batch
// adapters, checkpoint manager, and recorder together.
// Purpose: The single entry point a caller (CLI, system test) drives a run
// through.
// Dependencies: elspeth-checkpoint, elspeth-core, elspeth-graph,
// elspeth-landscape, serde_json, thiserror
// ============================================================================

//! ## Overview
//! `spec.md` §4.11 numbers the run procedure as five steps: begin the run,
//! register the graph, stream rows through it, flush anything still
//! pending once the source ends, and finalize. [`Orchestrator::run`] is
//! that procedure in order; [`crate::dispatch::Dispatcher`] does the actual
//! per-token graph walk for step 3, so this module stays a readable
//! top-level driver rather than reimplementing the walk inline.
//!
//! A cooperative shutdown signal (checked once per source row) is the only
//! concurrency this module introduces — per `spec.md` §5, the run itself
//! executes on the calling thread; only the batch worker pool and coalesce
//! timeout callbacks run elsewhere, entirely inside their owning crates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use elspeth_checkpoint::CheckpointError;
use elspeth_checkpoint::CheckpointEvent;
use elspeth_checkpoint::CheckpointManager;
use elspeth_checkpoint::Cursor;
use elspeth_checkpoint::NullSource;
use elspeth_checkpoint::ResumeDriver;
use elspeth_core::Clock;
use elspeth_core::EngineError;
use elspeth_core::HashError;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RunId;
use elspeth_core::TransformError;
use elspeth_graph::Graph;
use elspeth_graph::GraphError;
use elspeth_landscape::LandscapeError;
use elspeth_landscape::Recorder;
use elspeth_landscape::TokenInfo;
use elspeth_landscape::TokenManager;

use crate::dispatch::DispatchError;
use crate::dispatch::Dispatcher;
use crate::dispatch::RegisteredIds;
use crate::pipeline::PipelinePlugins;
use crate::result::RunOutcome;
use crate::result::RunResult;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors an orchestrated run can fail with. Anything reaching a caller
/// here means the run could not produce a trustworthy result at all, as
/// distinct from a row-level failure (which the dispatcher records and
/// continues past).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The graph's topology hash could not be computed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A Landscape write failed outside the dispatcher's own row-level
    /// recovery (e.g. `begin_run`, node/edge registration, `finalize_run`).
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// The graph walk itself failed in a way it could not recover from by
    /// quarantining a row.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Hashing the run configuration failed.
    #[error(transparent)]
    Hashing(#[from] HashError),
    /// Checkpoint persistence failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// A graph node id had no corresponding entry in
    /// [`PipelinePlugins::descriptors`], so it could not be registered.
    #[error("no node descriptor for graph node {0}")]
    MissingDescriptor(String),
    /// The source's row read failed.
    #[error("source read failed: {0}")]
    Source(String),
}

impl From<OrchestratorError> for EngineError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::Graph(inner) => inner.into(),
            OrchestratorError::Landscape(inner) => inner.into(),
            OrchestratorError::Dispatch(DispatchError::Landscape(inner)) => inner.into(),
            OrchestratorError::Dispatch(DispatchError::Coalesce(inner)) => inner.into(),
            OrchestratorError::Dispatch(other) => Self::Transform(TransformError::Permanent(other.to_string())),
            OrchestratorError::Hashing(inner) => Self::Integrity(inner.to_string()),
            OrchestratorError::Checkpoint(inner) => inner.into(),
            OrchestratorError::MissingDescriptor(detail) => Self::GraphValidation(format!("missing node descriptor: {detail}")),
            OrchestratorError::Source(detail) => Self::Transform(TransformError::Permanent(detail)),
        }
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Drives one run of a validated [`Graph`] end to end.
pub struct Orchestrator {
    graph: Graph,
    recorder: Arc<Recorder>,
    token_manager: Arc<TokenManager>,
    clock: Arc<dyn Clock>,
    checkpoint: Option<Arc<CheckpointManager>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Orchestrator {
    /// Builds an orchestrator for `graph`. `graph` must already pass
    /// [`Graph::validate`]; this constructor does not call it again.
    #[must_use]
    pub fn new(graph: Graph, recorder: Arc<Recorder>, token_manager: Arc<TokenManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            graph,
            recorder,
            token_manager,
            clock,
            checkpoint: None,
            shutdown: None,
        }
    }

    /// Attaches a checkpoint manager; a cursor is written after every row
    /// per `spec.md` §4.10's trigger model.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Arc<CheckpointManager>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Attaches a cooperative shutdown flag, checked once per source row.
    /// When set, the run stops reading the source, flushes everything
    /// already in flight, and completes with [`RunOutcome::Interrupted`]
    /// rather than propagating an error.
    #[must_use]
    pub fn with_shutdown_signal(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Runs `plugins` over this orchestrator's graph to completion (or
    /// interruption), implementing `spec.md` §4.11's five steps.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the run cannot produce a
    /// trustworthy result: graph registration failure, a Landscape write
    /// failing outside the dispatcher's own recovery, or the dispatcher
    /// itself returning [`DispatchError`]. Row-level failures (schema
    /// rejection, transform error, gate rejection) are recorded as
    /// `failed` terminal outcomes and do not appear here.
    pub fn run(&self, mut plugins: PipelinePlugins, config_json: &serde_json::Value) -> Result<RunResult, OrchestratorError> {
        // Step 1: begin the run.
        let run = self.recorder.begin_run(config_json)?;
        let run_id = run.run_id.clone();
        let topology_hash = self.graph.topology_hash()?;

        // Step 2: register every node and edge.
        let ids = self.register_graph(&run_id, &plugins)?;

        let mut dispatcher = Dispatcher::new(&self.graph, &mut plugins, &ids, Arc::clone(&self.recorder), Arc::clone(&self.token_manager), Arc::clone(&self.clock), run_id.clone());

        // Step 3: stream rows from the source, draining batch settlements
        // as they arrive so a long batch backlog never grows unbounded.
        let mut rows_processed: u64 = 0;
        let outcome = self.stream_source(&run_id, &run.config_hash, &topology_hash, &ids, &mut dispatcher, &mut rows_processed)?;

        // Step 4: flush everything still pending once the source ends.
        self.flush_pending(&mut dispatcher)?;

        // Step 5: compute reproducibility grade and finalize.
        let status = outcome.run_status();
        self.recorder.finalize_run(&run_id, status)?;

        Ok(RunResult {
            run_id,
            outcome,
            rows_processed,
            rows_succeeded: dispatcher.rows_succeeded,
            rows_failed: dispatcher.rows_failed,
        })
    }

    /// Resumes the run `cursor` points at, per `spec.md` §4.10's five-step
    /// procedure: [`ResumeDriver::resolve`] verifies the config and
    /// topology hashes still match, `plugins.source` is swapped for a
    /// [`NullSource`] preserving its schema contract and `on_success` edge,
    /// every sink is switched into append mode, and every row the
    /// Landscape shows with no terminal token outcome is reconstructed
    /// from the payload store by its recorded hash and re-walked from the
    /// source's entry edge.
    ///
    /// Nodes and edges are re-registered as a fresh snapshot of the same
    /// (topology-hash-verified) graph rather than reusing the original
    /// run's recorder-assigned ids: the Landscape schema records only
    /// `(node_type, plugin_name, plugin_version, ...)` per node, not the
    /// spec-level graph node id needed to look the originals back up.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for the same reasons as [`Self::run`],
    /// plus a wrapped [`CheckpointError`] when the cursor's config or
    /// topology hash no longer matches the current settings, or when a
    /// sink does not support resume.
    pub fn resume(&self, mut plugins: PipelinePlugins, config_json: &serde_json::Value, cursor: &Cursor) -> Result<RunResult, OrchestratorError> {
        let topology_hash = self.graph.topology_hash()?;
        let current_config_hash = elspeth_core::hashing::stable_hash(config_json)?;

        let driver = ResumeDriver::new(Arc::clone(&self.recorder));
        let decision = driver.resolve(&cursor.run_id, cursor, &current_config_hash, &topology_hash)?;
        let run_id = decision.run.run_id.clone();

        // Step 4: the source never re-reads; every row comes back from the
        // payload store below.
        let schema_contract = plugins.source.schema_contract();
        let on_success = plugins.source.on_success().to_string();
        plugins.source = Box::new(NullSource::new(schema_contract, on_success));

        // Step 5: every sink must support resume and switch to append mode.
        for (node_id, sink) in &mut plugins.sinks {
            driver.prepare_sink_for_resume(sink.as_mut(), node_id)?;
        }

        let ids = self.register_graph(&run_id, &plugins)?;
        let mut dispatcher = Dispatcher::new(&self.graph, &mut plugins, &ids, Arc::clone(&self.recorder), Arc::clone(&self.token_manager), Arc::clone(&self.clock), run_id.clone());
        let source_node_id_str = dispatcher.source_node_id().to_string();
        let source_node_id = ids.nodes.get(&source_node_id_str).cloned().ok_or_else(|| OrchestratorError::MissingDescriptor(source_node_id_str.clone()))?;

        // Step 3: re-enqueue every row with no terminal outcome.
        let mut rows_processed: u64 = 0;
        let mut outcome = RunOutcome::Completed;
        for row in self.recorder.find_incomplete_rows(&run_id)? {
            if self.shutdown_requested() {
                outcome = RunOutcome::Interrupted;
                break;
            }
            let Some(payload_ref) = row.payload_ref.as_ref() else {
                // Pre-dates payload persistence; nothing to reconstruct from.
                continue;
            };
            let bytes = self.recorder.retrieve_payload(payload_ref)?;
            let row_data: RowData = serde_json::from_slice(&bytes)
                .map_err(|err| OrchestratorError::Source(format!("corrupt row payload for row {}: {err}", row.row_id)))?;
            let token = self.recorder.create_token(&run_id, &row.row_id, 0)?;
            let token_info = TokenInfo::for_existing(row.row_id.clone(), token.token_id.clone(), row_data, None);

            rows_processed += 1;
            dispatcher.dispatch(&source_node_id_str, token_info, 0)?;

            if let Some(checkpoint) = &self.checkpoint {
                checkpoint.notify(CheckpointEvent::Row, || Cursor {
                    run_id: run_id.clone(),
                    config_hash: current_config_hash.clone(),
                    topology_hash: topology_hash.clone(),
                    token_id: token.token_id.clone(),
                    node_id: source_node_id.clone(),
                    step_index: 0,
                    sequence_number: 0,
                    aggregation_state: serde_json::json!({}),
                })?;
            }
        }

        self.flush_pending(&mut dispatcher)?;

        let status = outcome.run_status();
        self.recorder.finalize_run(&run_id, status)?;

        Ok(RunResult {
            run_id,
            outcome,
            rows_processed,
            rows_succeeded: dispatcher.rows_succeeded,
            rows_failed: dispatcher.rows_failed,
        })
    }

    fn register_graph(&self, run_id: &RunId, plugins: &PipelinePlugins) -> Result<RegisteredIds, OrchestratorError> {
        let mut ids = RegisteredIds::default();
        for node in &self.graph.nodes {
            let descriptor = plugins.descriptors.get(&node.id).ok_or_else(|| OrchestratorError::MissingDescriptor(node.id.clone()))?;
            let recorded = self.recorder.register_node(
                run_id,
                node.node_type,
                &descriptor.plugin_name,
                &descriptor.plugin_version,
                descriptor.determinism,
                descriptor.config_hash.clone(),
                descriptor.position,
                node.input_schema.clone(),
                node.output_schema.clone(),
            )?;
            ids.nodes.insert(node.id.clone(), recorded.node_id);
        }
        for edge in &self.graph.edges {
            let from_node_id = ids.nodes.get(&edge.from).ok_or_else(|| OrchestratorError::MissingDescriptor(edge.from.clone()))?.clone();
            let to_node_id = ids.nodes.get(&edge.to).ok_or_else(|| OrchestratorError::MissingDescriptor(edge.to.clone()))?.clone();
            let recorded = self.recorder.register_edge(run_id, &from_node_id, &to_node_id, &edge.label, edge.mode)?;
            ids.edges.insert((edge.from.clone(), edge.label.clone()), recorded.edge_id);
        }
        Ok(ids)
    }

    #[allow(clippy::too_many_arguments, reason = "Threads the identifiers every row's cursor write needs; splitting further would just move the list to a struct nobody else uses.")]
    fn stream_source(
        &self,
        run_id: &RunId,
        config_hash: &elspeth_core::HashDigest,
        topology_hash: &elspeth_core::HashDigest,
        ids: &RegisteredIds,
        dispatcher: &mut Dispatcher<'_>,
        rows_processed: &mut u64,
    ) -> Result<RunOutcome, OrchestratorError> {
        let source_node_id_str = dispatcher.source_node_id().to_string();
        let source_node_id = ids.nodes.get(&source_node_id_str).cloned().ok_or_else(|| OrchestratorError::MissingDescriptor(source_node_id_str.clone()))?;

        loop {
            if self.shutdown_requested() {
                return Ok(RunOutcome::Interrupted);
            }

            let ctx = PluginContext { run_id, node_id: &source_node_id, clock: self.clock.as_ref(), calls: None };
            let row = dispatcher.source_mut().next_row(&ctx).map_err(|error| OrchestratorError::Source(error.to_string()))?;
            let Some(row_data) = row else {
                return Ok(RunOutcome::Completed);
            };

            let row_index = *rows_processed;
            *rows_processed += 1;
            let initial = self.token_manager.create_initial_token(run_id, row_data, &source_node_id, row_index)?;
            let token_id = initial.token_id.clone();

            dispatcher.dispatch(&source_node_id_str, initial, 0)?;
            for graph_node_id in dispatcher.batch_transform_node_ids() {
                dispatcher.drain_batch_settlements(&graph_node_id)?;
            }

            if let Some(checkpoint) = &self.checkpoint {
                checkpoint.notify(CheckpointEvent::Row, || Cursor {
                    run_id: run_id.clone(),
                    config_hash: config_hash.clone(),
                    topology_hash: topology_hash.clone(),
                    token_id: token_id.clone(),
                    node_id: source_node_id.clone(),
                    step_index: 0,
                    sequence_number: 0,
                    aggregation_state: serde_json::json!({}),
                })?;
            }
        }
    }

    fn flush_pending(&self, dispatcher: &mut Dispatcher<'_>) -> Result<(), OrchestratorError> {
        for graph_node_id in dispatcher.batch_transform_node_ids() {
            dispatcher.flush_batch_transform(&graph_node_id, Duration::from_secs(60))?;
            dispatcher.drain_batch_settlements(&graph_node_id)?;
        }

        dispatcher.flush_coalesce(0)?;

        for graph_node_id in dispatcher.aggregation_node_ids() {
            dispatcher.finalize_aggregation_by_id(&graph_node_id, 0)?;
        }

        Ok(())
    }
}
