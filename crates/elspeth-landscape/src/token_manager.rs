// crates/elspeth-landscape/src/token_manager.rs
// ============================================================================
// Module: Token Manager
// Description: Thin wrapper over the recorder maintaining token identity rules.
// Purpose: Give orchestrator code a row/token-shaped API without reaching
// into the recorder's hashing and ID-generation details directly.
// Dependencies: elspeth-core, elspeth-landscape::recorder
// ============================================================================

//! ## Overview
//! `TokenInfo` is the in-memory value the orchestrator actually carries
//! between nodes: live row data plus the identifiers the recorder needs to
//! attribute further writes. The recorder itself only ever sees hashes and
//! parent links, never the row payload.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use elspeth_core::core::value::RowData;
use elspeth_core::hashing::HashAlgorithm;
use elspeth_core::hashing::stable_hash;
use elspeth_core::NodeId;
use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::TokenId;

use crate::db::LandscapeError;
use crate::recorder::Recorder;

// ============================================================================
// SECTION: TokenInfo
// ============================================================================

/// Live, in-memory identity carried alongside a row as it moves through the
/// pipeline. Distinct from the recorder's persisted [`elspeth_core::Token`]:
/// this struct additionally carries the row's actual data.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// Row this token traces back to.
    pub row_id: RowId,
    /// This token's own identifier.
    pub token_id: TokenId,
    /// The row's current data.
    pub row_data: RowData,
    /// Branch name, set only for tokens produced by a fork.
    pub branch_name: Option<String>,
}

impl TokenInfo {
    /// Builds a `TokenInfo` for a token the recorder already knows about,
    /// e.g. when reloading state after a resume.
    #[must_use]
    pub fn for_existing(row_id: RowId, token_id: TokenId, row_data: RowData, branch_name: Option<String>) -> Self {
        Self {
            row_id,
            token_id,
            row_data,
            branch_name,
        }
    }
}

// ============================================================================
// SECTION: TokenManager
// ============================================================================

/// Thin wrapper around the [`Recorder`] maintaining token identity rules
/// (`spec.md` §4.6): initial creation, fork, coalesce, and expand all
/// delegate their persistence to the recorder and return the caller a
/// `TokenInfo` (or several) carrying live row data.
pub struct TokenManager {
    recorder: Arc<Recorder>,
}

impl TokenManager {
    /// Wraps `recorder`.
    #[must_use]
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }

    /// Creates the row and its initial token for a value freshly read from
    /// a source.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the recorder's row or token insert
    /// fails.
    pub fn create_initial_token(
        &self,
        run_id: &RunId,
        row_data: RowData,
        source_node_id: &NodeId,
        row_index: u64,
    ) -> Result<TokenInfo, LandscapeError> {
        let source_data_hash = stable_hash(&row_data).map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let payload_bytes = serde_json::to_vec(&row_data).map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let payload_ref = self.recorder.store_payload(&payload_bytes)?;
        let row = self.recorder.create_row(run_id, source_node_id, row_index, source_data_hash, payload_ref)?;
        let token = self.recorder.create_token(run_id, &row.row_id, 0)?;
        Ok(TokenInfo {
            row_id: row.row_id,
            token_id: token.token_id,
            row_data,
            branch_name: None,
        })
    }

    /// Forks `parent` into one child per branch, preserving row data and
    /// assigning each child its branch name in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `branches` is empty.
    pub fn fork_token(&self, parent: &TokenInfo, branches: &[String], step: u32) -> Result<Vec<TokenInfo>, LandscapeError> {
        let children = self.recorder.fork_token(&parent.token_id, &parent.row_id, branches, step)?;
        Ok(children
            .into_iter()
            .map(|child| TokenInfo {
                row_id: child.row_id,
                token_id: child.token_id,
                row_data: parent.row_data.clone(),
                branch_name: child.branch_name,
            })
            .collect())
    }

    /// Coalesces `parents` into a single child carrying `row_data` (the
    /// merge result computed by the caller).
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `parents` is empty.
    pub fn coalesce(&self, parents: &[TokenInfo], row_data: RowData, step: u32) -> Result<TokenInfo, LandscapeError> {
        let parent_ids: Vec<TokenId> = parents.iter().map(|parent| parent.token_id.clone()).collect();
        let row_id = parents
            .first()
            .map(|parent| parent.row_id.clone())
            .ok_or_else(|| LandscapeError::Integrity("coalesce requires at least one parent".to_string()))?;
        let child = self.recorder.coalesce_tokens(&parent_ids, &row_id, step)?;
        Ok(TokenInfo {
            row_id: child.row_id,
            token_id: child.token_id,
            row_data,
            branch_name: None,
        })
    }

    /// Expands `parent` into `count` children, each carrying a clone of its
    /// current row data (the caller mutates each clone as needed).
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `count` is zero.
    pub fn expand(&self, parent: &TokenInfo, count: u32, step: u32) -> Result<Vec<TokenInfo>, LandscapeError> {
        let children = self.recorder.expand_token(&parent.token_id, &parent.row_id, count, step)?;
        Ok(children
            .into_iter()
            .map(|child| TokenInfo {
                row_id: child.row_id,
                token_id: child.token_id,
                row_data: parent.row_data.clone(),
                branch_name: None,
            })
            .collect())
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
    use elspeth_core::core::schema::SchemaContract;
    use elspeth_core::core::schema::SchemaMode;
    use elspeth_core::core::time::SystemClock;
    use elspeth_core::core::value::Value;
    use elspeth_core::Determinism;
    use elspeth_core::NodeType;

    use super::*;
    use crate::db::Database;
    use crate::db::LandscapeConfig;

    fn test_manager() -> (tempfile::TempDir, TokenManager, RunId, NodeId) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).unwrap());
        let recorder = Arc::new(Recorder::new(db, None, Arc::new(SystemClock)));
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        let node = recorder
            .register_node(
                &run.run_id,
                NodeType::Source,
                "inline",
                "0.1.0",
                Determinism::Deterministic,
                elspeth_core::HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(0),
                SchemaContract::open(SchemaMode::Flexible),
                SchemaContract::open(SchemaMode::Flexible),
            )
            .unwrap();
        let manager = TokenManager::new(recorder);
        (dir, manager, run.run_id, node.node_id)
    }

    fn row_data() -> RowData {
        RowData::new().with_field("a", Value::Int(1))
    }

    #[test]
    fn create_initial_token_has_no_branch() {
        let (_dir, manager, run_id, node_id) = test_manager();
        let info = manager.create_initial_token(&run_id, row_data(), &node_id, 0).unwrap();
        assert!(info.branch_name.is_none());
    }

    #[test]
    fn fork_preserves_row_data_and_assigns_branch_names() {
        let (_dir, manager, run_id, node_id) = test_manager();
        let parent = manager.create_initial_token(&run_id, row_data(), &node_id, 0).unwrap();
        let children = manager
            .fork_token(&parent, &["left".to_string(), "right".to_string()], 1)
            .unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].branch_name.as_deref(), Some("left"));
        assert_eq!(children[1].branch_name.as_deref(), Some("right"));
        assert_eq!(children[0].row_data, parent.row_data);
    }

    #[test]
    fn coalesce_requires_at_least_one_parent() {
        let (_dir, manager, _run_id, _node_id) = test_manager();
        let result = manager.coalesce(&[], RowData::default(), 2);
        assert!(matches!(result, Err(LandscapeError::Integrity(_))));
    }

    #[test]
    fn expand_produces_requested_count() {
        let (_dir, manager, run_id, node_id) = test_manager();
        let parent = manager.create_initial_token(&run_id, row_data(), &node_id, 0).unwrap();
        let children = manager.expand(&parent, 3, 1).unwrap();
        assert_eq!(children.len(), 3);
    }
}
