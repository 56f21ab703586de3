// crates/elspeth-checkpoint/src/cursor.rs
// ============================================================================
// Module: Cursor and Cursor Store
// Description: The durable position a run has reached, and its on-disk
// persistence.
// Purpose: `spec.md` §4.10: "A cursor captures: the last successfully
// completed (token_id, node_id, step_index, sequence_number) and any
// in-progress aggregation state (partial batch members, per-coalesce
// pending tokens)."
// Dependencies: elspeth-core, serde_json, std::fs
// ============================================================================

//! ## Overview
//! A [`Cursor`] is a small, self-contained JSON document: the resume point
//! plus the graph and config hashes in effect when it was written, so
//! [`crate::resume::ResumeDriver`] can detect drift without re-deriving
//! anything from the Landscape database. [`CursorStore`] persists it with a
//! write-to-temp-then-rename, matching the durability posture of every other
//! on-disk artifact in this workspace (the Landscape's own WAL-journaled
//! SQLite file, the payload store's content-addressed files).

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use elspeth_core::HashDigest;
use elspeth_core::NodeId;
use elspeth_core::RunId;
use elspeth_core::TokenId;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised persisting or loading a [`Cursor`].
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The cursor file could not be read or written.
    #[error("checkpoint io error: {0}")]
    Io(String),
    /// The cursor file's contents did not parse as a [`Cursor`].
    #[error("checkpoint deserialize error: {0}")]
    Serialize(String),
    /// Resume was attempted with no persisted cursor to resume from.
    #[error("no checkpoint found to resume from")]
    NoCheckpoint,
    /// The current settings' config hash does not match the one recorded
    /// against the checkpointed run.
    #[error("config hash mismatch: checkpoint has {checkpointed}, current settings hash {current}")]
    ConfigHashMismatch {
        /// Hash recorded in the cursor.
        checkpointed: String,
        /// Hash computed from the current settings.
        current: String,
    },
    /// The current graph's topology hash does not match the one recorded
    /// against the checkpointed run.
    #[error("topology hash mismatch: checkpoint has {checkpointed}, current graph hash {current}")]
    TopologyMismatch {
        /// Hash recorded in the cursor.
        checkpointed: String,
        /// Hash computed from the current graph.
        current: String,
    },
    /// A sink declared resume support but rejected the existing output
    /// target (e.g. its headers or field order do not match).
    #[error("sink {sink} cannot resume into its existing output target: {detail}")]
    SinkOutputTargetIncompatible {
        /// The sink's node id.
        sink: String,
        /// The sink's rejection detail.
        detail: String,
    },
    /// A sink in the graph does not declare `supports_resume`.
    #[error("sink {0} does not support resume")]
    SinkDoesNotSupportResume(String),
}

impl From<CheckpointError> for elspeth_core::EngineError {
    fn from(error: CheckpointError) -> Self {
        match error {
            CheckpointError::ConfigHashMismatch { .. } | CheckpointError::TopologyMismatch { .. } => {
                Self::CheckpointMismatch(error.to_string())
            }
            other => Self::CheckpointMismatch(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// The durable position a run has reached, per `spec.md` §4.10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    /// The run this cursor belongs to.
    pub run_id: RunId,
    /// The config hash in effect when this cursor was written.
    pub config_hash: HashDigest,
    /// The execution graph's topology hash in effect when this cursor was
    /// written.
    pub topology_hash: HashDigest,
    /// The last token fully processed; resume's next token to dispatch.
    pub token_id: TokenId,
    /// The node the cursor's token last completed at.
    pub node_id: NodeId,
    /// The step index within the token's path.
    pub step_index: u32,
    /// A monotonically increasing sequence number, incremented once per
    /// checkpoint write, for ordering cursors written in the same instant.
    pub sequence_number: u64,
    /// Opaque in-progress aggregation state: partial batch members and
    /// per-coalesce pending tokens, serialized by whichever component owns
    /// that state (the orchestrator, via [`crate::manager::CheckpointManager`]).
    pub aggregation_state: serde_json::Value,
}

// ============================================================================
// SECTION: Cursor Store
// ============================================================================

/// Persists a single [`Cursor`] to a JSON file, overwriting the prior one.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the persisted cursor, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the file exists but cannot be read,
    /// or [`CheckpointError::Serialize`] if its contents do not parse.
    pub fn load(&self) -> Result<Option<Cursor>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|err| CheckpointError::Io(err.to_string()))?;
        let cursor = serde_json::from_str(&contents).map_err(|err| CheckpointError::Serialize(err.to_string()))?;
        Ok(Some(cursor))
    }

    /// Persists `cursor`, replacing any prior one, via a write-to-temp then
    /// rename so a crash mid-write never leaves a truncated cursor file.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the write or rename fails, or
    /// [`CheckpointError::Serialize`] if `cursor` cannot be serialized.
    pub fn persist(&self, cursor: &Cursor) -> Result<(), CheckpointError> {
        let serialized = serde_json::to_vec_pretty(cursor).map_err(|err| CheckpointError::Serialize(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| CheckpointError::Io(err.to_string()))?;
            }
        }
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, serialized).map_err(|err| CheckpointError::Io(err.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| CheckpointError::Io(err.to_string()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
