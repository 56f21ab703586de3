// crates/elspeth-checkpoint/src/resume.rs
// ============================================================================
// Module: Resume Driver
// Description: The five-step topology-validated recovery procedure a resumed
// run executes before the orchestrator dispatches a single row.
// Purpose: `spec.md` §4.10's resume procedure, quoted in full in this
// module's overview.
// Dependencies: elspeth-core, elspeth-graph, elspeth-landscape, crate::cursor
// ============================================================================

//! ## Overview
//! `spec.md` §4.10 describes resume as five steps: (1) load the persisted
//! run and verify its config hash against the new settings; (2) build the
//! current graph, compute its topology hash, and compare against the
//! recorded one, a mismatch failing with a typed error naming which
//! subgraph differs; (3) determine the resume point, the cursor's token
//! becoming the next to process and every row with an unfinished terminal
//! outcome re-enqueued; (4) swap the source with [`NullSource`], which
//! yields nothing (all data comes back from the payload store by row hash)
//! while preserving the original source's default edge label so DAG
//! validation still passes; (5) every sink must declare `supports_resume`,
//! each switched to append mode via `configure_for_resume` and checked
//! against its existing output target.
//!
//! [`ResumeDriver`] performs steps 1, 2, 4 and 5, and hands back a
//! [`ResumeDecision`] carrying the cursor's resume point for step 3, which
//! the orchestrator completes by re-enqueuing any row it finds without a
//! terminal outcome (a query over the Landscape the orchestrator, not this
//! crate, is positioned to make once it is driving the run).

use std::sync::Arc;

use elspeth_core::HashDigest;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::Run;
use elspeth_core::RowData;
use elspeth_core::RunId;
use elspeth_core::SchemaContract;
use elspeth_core::Sink;
use elspeth_core::SinkError;
use elspeth_core::Source;
use elspeth_core::SourceError;
use elspeth_core::TokenId;
use elspeth_landscape::LandscapeError;
use elspeth_landscape::Recorder;

use crate::cursor::CheckpointError;
use crate::cursor::Cursor;

// ============================================================================
// SECTION: Graceful shutdown
// ============================================================================

/// Raised when a cooperative cancel (SIGINT or equivalent) was observed
/// mid-run. Not a failure: the orchestrator finishes in-flight rows, writes
/// a cursor, and reports the run `interrupted` with exit code 3.
#[derive(Debug, thiserror::Error)]
#[error("graceful shutdown requested")]
pub struct GracefulShutdownError;

impl From<GracefulShutdownError> for elspeth_core::EngineError {
    fn from(_error: GracefulShutdownError) -> Self {
        Self::GracefulShutdown
    }
}

// ============================================================================
// SECTION: Resume decision
// ============================================================================

/// The resume point a [`ResumeDriver`] hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct ResumeDecision {
    /// The run being resumed.
    pub run: Run,
    /// The cursor's resume point: the last token fully processed.
    pub resume_from_token: TokenId,
    /// The node the resume token last completed at.
    pub resume_from_node: NodeId,
    /// The step index within the resumed token's path.
    pub step_index: u32,
    /// In-progress aggregation state recorded in the cursor (partial batch
    /// members, per-coalesce pending tokens), opaque to this crate.
    pub aggregation_state: serde_json::Value,
}

// ============================================================================
// SECTION: Resume driver
// ============================================================================

/// Drives `spec.md` §4.10's resume procedure.
pub struct ResumeDriver {
    recorder: Arc<Recorder>,
}

impl ResumeDriver {
    /// Creates a driver reading run state through `recorder`.
    #[must_use]
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }

    /// Step 1 and 2: loads the persisted run, verifies `current_config_hash`
    /// against the cursor, compares `current_topology_hash` against the
    /// one recorded in the cursor, and (on success) returns the resume
    /// point from step 3.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ConfigHashMismatch`] or
    /// [`CheckpointError::TopologyMismatch`] when the current settings or
    /// graph have drifted since the checkpoint was written, or propagates a
    /// [`LandscapeError`] (via [`CheckpointError::Io`]) if the run cannot be
    /// loaded.
    pub fn resolve(
        &self,
        run_id: &RunId,
        cursor: &Cursor,
        current_config_hash: &HashDigest,
        current_topology_hash: &HashDigest,
    ) -> Result<ResumeDecision, CheckpointError> {
        let run = self.recorder.get_run(run_id).map_err(landscape_to_checkpoint_error)?;

        if &cursor.config_hash != current_config_hash {
            return Err(CheckpointError::ConfigHashMismatch {
                checkpointed: cursor.config_hash.to_string(),
                current: current_config_hash.to_string(),
            });
        }
        if &cursor.topology_hash != current_topology_hash {
            return Err(CheckpointError::TopologyMismatch {
                checkpointed: cursor.topology_hash.to_string(),
                current: current_topology_hash.to_string(),
            });
        }

        Ok(ResumeDecision {
            run,
            resume_from_token: cursor.token_id.clone(),
            resume_from_node: cursor.node_id.clone(),
            step_index: cursor.step_index,
            aggregation_state: cursor.aggregation_state.clone(),
        })
    }

    /// Step 5: checks that `sink` declares resume support, switches it to
    /// append mode, and validates its existing output target is compatible
    /// with the declared schema. `node_id` is used only for error detail.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::SinkDoesNotSupportResume`] if the sink
    /// does not declare `supports_resume`, or
    /// [`CheckpointError::SinkOutputTargetIncompatible`] if its existing
    /// output target fails validation.
    pub fn prepare_sink_for_resume(&self, sink: &mut dyn Sink, node_id: &str) -> Result<(), CheckpointError> {
        if !sink.supports_resume() {
            return Err(CheckpointError::SinkDoesNotSupportResume(node_id.to_string()));
        }
        sink.configure_for_resume().map_err(|err| CheckpointError::SinkOutputTargetIncompatible {
            sink: node_id.to_string(),
            detail: err.to_string(),
        })?;
        let validation = sink.validate_output_target().map_err(|err| CheckpointError::SinkOutputTargetIncompatible {
            sink: node_id.to_string(),
            detail: err.to_string(),
        })?;
        if !validation.compatible {
            return Err(CheckpointError::SinkOutputTargetIncompatible {
                sink: node_id.to_string(),
                detail: validation.detail.unwrap_or_else(|| "incompatible output target".to_string()),
            });
        }
        Ok(())
    }
}

fn landscape_to_checkpoint_error(error: LandscapeError) -> CheckpointError {
    match error {
        LandscapeError::NotFound(detail) => CheckpointError::Io(format!("no such run: {detail}")),
        other => CheckpointError::Io(other.to_string()),
    }
}

// ============================================================================
// SECTION: Null source
// ============================================================================

/// Step 4's source swap: yields nothing, since a resumed run reconstructs
/// every row from the payload store by its recorded hash rather than
/// re-reading the original input. Carries the original source's schema
/// contract and default edge label so the rebuilt graph's reachability and
/// schema-coverage checks pass unchanged.
pub struct NullSource {
    schema_contract: SchemaContract,
    on_success: String,
}

impl NullSource {
    /// Creates a null source standing in for `original`'s schema contract
    /// and default edge label.
    #[must_use]
    pub fn new(schema_contract: SchemaContract, on_success: impl Into<String>) -> Self {
        Self {
            schema_contract,
            on_success: on_success.into(),
        }
    }
}

impl Source for NullSource {
    fn next_row(&mut self, _ctx: &PluginContext<'_>) -> Result<Option<RowData>, SourceError> {
        Ok(None)
    }

    fn schema_contract(&self) -> SchemaContract {
        self.schema_contract.clone()
    }

    fn on_success(&self) -> &str {
        &self.on_success
    }

    fn supports_resume(&self) -> bool {
        true
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
