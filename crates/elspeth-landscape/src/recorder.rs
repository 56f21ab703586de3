// crates/elspeth-landscape/src/recorder.rs
// ============================================================================
// Module: Landscape Recorder
// Description: Typed write/read facade over the relational audit schema.
// Purpose: The single write path every other Elspeth component uses to
// persist runs, nodes, edges, rows, tokens, node states, routing events,
// calls, and outcomes.
// Dependencies: elspeth-core, elspeth-store, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Every mutating method here validates and coerces enum values: a string
//! that is not a recognized enum member is a fatal [`LandscapeError::InvalidEnum`],
//! never a silent fallback. Reads return immutable record structs from
//! `elspeth_core::core::model`. All ordering-sensitive queries sort by
//! `(created_at, primary_id)` for determinism (`spec.md` §4.4).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use elspeth_core::core::model::Batch;
use elspeth_core::core::model::BatchMember;
use elspeth_core::core::model::BatchStatus;
use elspeth_core::core::model::Call;
use elspeth_core::core::model::CallStatus;
use elspeth_core::core::model::CallType;
use elspeth_core::core::model::Determinism;
use elspeth_core::core::model::Edge;
use elspeth_core::core::model::EdgeMode;
use elspeth_core::core::model::ExportStatus;
use elspeth_core::core::model::Node;
use elspeth_core::core::model::NodeState;
use elspeth_core::core::model::NodeStateStatus;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::ReproducibilityGrade;
use elspeth_core::core::model::Row;
use elspeth_core::core::model::RoutingEvent;
use elspeth_core::core::model::Run;
use elspeth_core::core::model::RunStatus;
use elspeth_core::core::model::Token;
use elspeth_core::core::model::TokenOutcome;
use elspeth_core::core::model::TokenOutcomeKind;
use elspeth_core::core::model::TokenParent;
use elspeth_core::core::model::TransformErrorRecord;
use elspeth_core::core::model::ValidationErrorRecord;
use elspeth_core::core::schema::SchemaContract;
use elspeth_core::core::time::Clock;
use elspeth_core::core::time::Timestamp;
use elspeth_core::core::value::RowData;
use elspeth_core::hashing::HashAlgorithm;
use elspeth_core::hashing::HashDigest;
use elspeth_core::BatchId;
use elspeth_core::CallId;
use elspeth_core::EdgeId;
use elspeth_core::ExpandGroupId;
use elspeth_core::ForkGroupId;
use elspeth_core::JoinGroupId;
use elspeth_core::NodeId;
use elspeth_core::RoutingEventId;
use elspeth_core::RoutingGroupId;
use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::StateId;
use elspeth_core::TokenId;
use elspeth_core::TransformErrorId;
use elspeth_core::ValidationErrorId;
use elspeth_store::PayloadStore;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::db::Database;
use crate::db::LandscapeError;
use crate::ids::new_id;

// ============================================================================
// SECTION: Enum <-> Column Conversions
// ============================================================================
//
// Hand-written rather than `serde_json` round-tripping so the stored text
// has no surrounding quotes and an unrecognized value is a clear,
// named-field `InvalidEnum` rather than a generic JSON error.

fn run_status_to_str(value: RunStatus) -> &'static str {
    match value {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Interrupted => "interrupted",
    }
}

fn run_status_from_str(value: &str) -> Result<RunStatus, LandscapeError> {
    match value {
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "interrupted" => Ok(RunStatus::Interrupted),
        other => Err(LandscapeError::InvalidEnum {
            field: "runs.status",
            value: other.to_string(),
        }),
    }
}

fn export_status_to_str(value: ExportStatus) -> &'static str {
    match value {
        ExportStatus::NotExported => "not_exported",
        ExportStatus::Exporting => "exporting",
        ExportStatus::Exported => "exported",
        ExportStatus::ExportFailed => "export_failed",
    }
}

fn export_status_from_str(value: &str) -> Result<ExportStatus, LandscapeError> {
    match value {
        "not_exported" => Ok(ExportStatus::NotExported),
        "exporting" => Ok(ExportStatus::Exporting),
        "exported" => Ok(ExportStatus::Exported),
        "export_failed" => Ok(ExportStatus::ExportFailed),
        other => Err(LandscapeError::InvalidEnum {
            field: "runs.export_status",
            value: other.to_string(),
        }),
    }
}

fn reproducibility_grade_to_str(value: ReproducibilityGrade) -> &'static str {
    match value {
        ReproducibilityGrade::FullReproducible => "full_reproducible",
        ReproducibilityGrade::ReplayReproducible => "replay_reproducible",
    }
}

fn reproducibility_grade_from_str(value: &str) -> Result<ReproducibilityGrade, LandscapeError> {
    match value {
        "full_reproducible" => Ok(ReproducibilityGrade::FullReproducible),
        "replay_reproducible" => Ok(ReproducibilityGrade::ReplayReproducible),
        other => Err(LandscapeError::InvalidEnum {
            field: "runs.reproducibility_grade",
            value: other.to_string(),
        }),
    }
}

fn node_type_to_str(value: NodeType) -> &'static str {
    match value {
        NodeType::Source => "source",
        NodeType::Transform => "transform",
        NodeType::Gate => "gate",
        NodeType::Aggregation => "aggregation",
        NodeType::Coalesce => "coalesce",
        NodeType::Sink => "sink",
    }
}

fn node_type_from_str(value: &str) -> Result<NodeType, LandscapeError> {
    match value {
        "source" => Ok(NodeType::Source),
        "transform" => Ok(NodeType::Transform),
        "gate" => Ok(NodeType::Gate),
        "aggregation" => Ok(NodeType::Aggregation),
        "coalesce" => Ok(NodeType::Coalesce),
        "sink" => Ok(NodeType::Sink),
        other => Err(LandscapeError::InvalidEnum {
            field: "nodes.node_type",
            value: other.to_string(),
        }),
    }
}

fn determinism_to_str(value: Determinism) -> &'static str {
    match value {
        Determinism::Deterministic => "deterministic",
        Determinism::Seeded => "seeded",
        Determinism::Nondeterministic => "nondeterministic",
        Determinism::IoRead => "io_read",
        Determinism::IoWrite => "io_write",
    }
}

fn determinism_from_str(value: &str) -> Result<Determinism, LandscapeError> {
    match value {
        "deterministic" => Ok(Determinism::Deterministic),
        "seeded" => Ok(Determinism::Seeded),
        "nondeterministic" => Ok(Determinism::Nondeterministic),
        "io_read" => Ok(Determinism::IoRead),
        "io_write" => Ok(Determinism::IoWrite),
        other => Err(LandscapeError::InvalidEnum {
            field: "nodes.determinism",
            value: other.to_string(),
        }),
    }
}

fn edge_mode_to_str(value: EdgeMode) -> &'static str {
    match value {
        EdgeMode::Move => "move",
        EdgeMode::Copy => "copy",
    }
}

fn edge_mode_from_str(value: &str) -> Result<EdgeMode, LandscapeError> {
    match value {
        "move" => Ok(EdgeMode::Move),
        "copy" => Ok(EdgeMode::Copy),
        other => Err(LandscapeError::InvalidEnum {
            field: "edges.mode",
            value: other.to_string(),
        }),
    }
}

fn node_state_status_to_str(value: NodeStateStatus) -> &'static str {
    match value {
        NodeStateStatus::Open => "open",
        NodeStateStatus::Completed => "completed",
        NodeStateStatus::Failed => "failed",
    }
}

fn node_state_status_from_str(value: &str) -> Result<NodeStateStatus, LandscapeError> {
    match value {
        "open" => Ok(NodeStateStatus::Open),
        "completed" => Ok(NodeStateStatus::Completed),
        "failed" => Ok(NodeStateStatus::Failed),
        other => Err(LandscapeError::InvalidEnum {
            field: "node_states.status",
            value: other.to_string(),
        }),
    }
}

fn token_outcome_kind_to_str(value: TokenOutcomeKind) -> &'static str {
    match value {
        TokenOutcomeKind::Completed => "completed",
        TokenOutcomeKind::Routed => "routed",
        TokenOutcomeKind::Failed => "failed",
        TokenOutcomeKind::Forked => "forked",
        TokenOutcomeKind::Coalesced => "coalesced",
        TokenOutcomeKind::Expanded => "expanded",
        TokenOutcomeKind::Buffered => "buffered",
        TokenOutcomeKind::ConsumedInBatch => "consumed_in_batch",
        TokenOutcomeKind::Quarantined => "quarantined",
    }
}

fn token_outcome_kind_from_str(value: &str) -> Result<TokenOutcomeKind, LandscapeError> {
    match value {
        "completed" => Ok(TokenOutcomeKind::Completed),
        "routed" => Ok(TokenOutcomeKind::Routed),
        "failed" => Ok(TokenOutcomeKind::Failed),
        "forked" => Ok(TokenOutcomeKind::Forked),
        "coalesced" => Ok(TokenOutcomeKind::Coalesced),
        "expanded" => Ok(TokenOutcomeKind::Expanded),
        "buffered" => Ok(TokenOutcomeKind::Buffered),
        "consumed_in_batch" => Ok(TokenOutcomeKind::ConsumedInBatch),
        "quarantined" => Ok(TokenOutcomeKind::Quarantined),
        other => Err(LandscapeError::InvalidEnum {
            field: "token_outcomes.kind",
            value: other.to_string(),
        }),
    }
}

fn batch_status_to_str(value: BatchStatus) -> &'static str {
    match value {
        BatchStatus::Draft => "draft",
        BatchStatus::Executing => "executing",
        BatchStatus::Completed => "completed",
        BatchStatus::Failed => "failed",
    }
}

fn batch_status_from_str(value: &str) -> Result<BatchStatus, LandscapeError> {
    match value {
        "draft" => Ok(BatchStatus::Draft),
        "executing" => Ok(BatchStatus::Executing),
        "completed" => Ok(BatchStatus::Completed),
        "failed" => Ok(BatchStatus::Failed),
        other => Err(LandscapeError::InvalidEnum {
            field: "batches.status",
            value: other.to_string(),
        }),
    }
}

fn call_type_to_str(value: CallType) -> &'static str {
    match value {
        CallType::Llm => "llm",
        CallType::Http => "http",
        CallType::Sql => "sql",
        CallType::Filesystem => "filesystem",
    }
}

fn call_type_from_str(value: &str) -> Result<CallType, LandscapeError> {
    match value {
        "llm" => Ok(CallType::Llm),
        "http" => Ok(CallType::Http),
        "sql" => Ok(CallType::Sql),
        "filesystem" => Ok(CallType::Filesystem),
        other => Err(LandscapeError::InvalidEnum {
            field: "calls.call_type",
            value: other.to_string(),
        }),
    }
}

fn call_status_to_str(value: CallStatus) -> &'static str {
    match value {
        CallStatus::Success => "success",
        CallStatus::Error => "error",
    }
}

fn call_status_from_str(value: &str) -> Result<CallStatus, LandscapeError> {
    match value {
        "success" => Ok(CallStatus::Success),
        "error" => Ok(CallStatus::Error),
        other => Err(LandscapeError::InvalidEnum {
            field: "calls.status",
            value: other.to_string(),
        }),
    }
}

fn hash_column(digest: &HashDigest) -> &str {
    digest.as_hex()
}

fn hash_from_column(value: &str) -> HashDigest {
    HashDigest::from_hex(HashAlgorithm::Sha256, value.to_string())
}

fn timestamp_column(value: Timestamp) -> String {
    value.to_rfc3339()
}

fn timestamp_from_column(value: &str) -> Result<Timestamp, LandscapeError> {
    Timestamp::parse_rfc3339(value)
        .map_err(|err| LandscapeError::Integrity(format!("invalid timestamp '{value}': {err}")))
}

fn u64_column(value: u64) -> Result<i64, LandscapeError> {
    i64::try_from(value).map_err(|_| LandscapeError::Integrity("value exceeds i64 range".to_string()))
}

fn u32_column(value: u32) -> i64 {
    i64::from(value)
}

fn column_to_u32(value: i64) -> Result<u32, LandscapeError> {
    u32::try_from(value).map_err(|_| LandscapeError::Integrity("value out of u32 range".to_string()))
}

fn column_to_u64(value: i64) -> Result<u64, LandscapeError> {
    u64::try_from(value).map_err(|_| LandscapeError::Integrity("value out of u64 range".to_string()))
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Completion detail for [`Recorder::complete_node_state`].
#[derive(Debug, Clone)]
pub enum NodeStateCompletion {
    /// The node finished processing successfully.
    Completed {
        /// Hash of the row as it left the node.
        output_hash: HashDigest,
        /// Structured context captured at completion, if any.
        context_after_json: Option<String>,
    },
    /// The node finished processing with an error.
    Failed {
        /// Structured error payload.
        error_json: String,
    },
}

/// One destination in a multi-edge routing decision, for
/// [`Recorder::record_routing_events`].
#[derive(Debug, Clone)]
pub struct RoutingEventInput {
    /// Destination edge.
    pub edge_id: EdgeId,
    /// Routing mode for this destination.
    pub mode: EdgeMode,
    /// Hash of the reason/condition that produced this route.
    pub reason_hash: HashDigest,
}

/// Typed write/read facade over the Landscape schema; the single write
/// path for every audit record.
pub struct Recorder {
    db: Arc<Database>,
    payload_store: Option<Arc<dyn PayloadStore>>,
    clock: Arc<dyn Clock>,
}

impl Recorder {
    /// Builds a recorder over `db`, optionally persisting call/row payload
    /// bytes through `payload_store`, using `clock` for every timestamp it
    /// writes.
    #[must_use]
    pub fn new(db: Arc<Database>, payload_store: Option<Arc<dyn PayloadStore>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            payload_store,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    /// Begins a new run, hashing `config_json` as the canonical
    /// configuration fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the configuration cannot be
    /// canonicalized or the insert fails.
    pub fn begin_run(&self, config_json: &serde_json::Value) -> Result<Run, LandscapeError> {
        let canonical = elspeth_core::hashing::canonical_json_string(config_json)
            .map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let config_hash = elspeth_core::hashing::stable_hash(config_json)
            .map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let run_id = RunId::new(new_id("run"));
        let started_at = self.now();
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO runs (
                run_id, config_json, config_hash, canonical_version, started_at,
                completed_at, status, reproducibility_grade, export_status
             ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL, ?7)",
            params![
                run_id.as_str(),
                canonical,
                hash_column(&config_hash),
                elspeth_core::hashing::CANONICAL_VERSION,
                timestamp_column(started_at),
                run_status_to_str(RunStatus::Running),
                export_status_to_str(ExportStatus::NotExported),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(Run {
            run_id,
            config_json: canonical,
            config_hash,
            canonical_version: elspeth_core::hashing::CANONICAL_VERSION.to_string(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            reproducibility_grade: None,
            export_status: ExportStatus::NotExported,
        })
    }

    /// Marks a run completed, failed, or interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] when `run_id` is unknown.
    pub fn complete_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), LandscapeError> {
        let completed_at = self.now();
        let conn = self.db.writer();
        let updated = conn
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3",
                params![run_status_to_str(status), timestamp_column(completed_at), run_id.as_str()],
            )
            .map_err(LandscapeError::from_rusqlite)?;
        if updated == 0 {
            return Err(LandscapeError::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    /// Updates a run's independent export status.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] when `run_id` is unknown.
    pub fn set_export_status(&self, run_id: &RunId, export_status: ExportStatus) -> Result<(), LandscapeError> {
        let conn = self.db.writer();
        let updated = conn
            .execute(
                "UPDATE runs SET export_status = ?1 WHERE run_id = ?2",
                params![export_status_to_str(export_status), run_id.as_str()],
            )
            .map_err(LandscapeError::from_rusqlite)?;
        if updated == 0 {
            return Err(LandscapeError::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    /// Loads a run by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] when `run_id` is unknown.
    pub fn get_run(&self, run_id: &RunId) -> Result<Run, LandscapeError> {
        let conn = self.db.writer();
        load_run(&conn, run_id)
    }

    // ------------------------------------------------------------------
    // Nodes and edges
    // ------------------------------------------------------------------

    /// Registers a node, assigning it a fresh `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the schemas cannot be serialized or
    /// the insert fails.
    #[allow(clippy::too_many_arguments, reason = "Mirrors the full Node record the recorder persists.")]
    pub fn register_node(
        &self,
        run_id: &RunId,
        node_type: NodeType,
        plugin_name: &str,
        plugin_version: &str,
        determinism: Determinism,
        config_hash: HashDigest,
        position: Option<u32>,
        input_schema: SchemaContract,
        output_schema: SchemaContract,
    ) -> Result<Node, LandscapeError> {
        let node_id = NodeId::new(new_id("node"));
        let input_schema_json = serde_json::to_string(&input_schema)
            .map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let output_schema_json = serde_json::to_string(&output_schema)
            .map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO nodes (
                node_id, run_id, node_type, plugin_name, plugin_version, determinism,
                config_hash, position, input_schema_json, output_schema_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                node_id.as_str(),
                run_id.as_str(),
                node_type_to_str(node_type),
                plugin_name,
                plugin_version,
                determinism_to_str(determinism),
                hash_column(&config_hash),
                position.map(u32_column),
                input_schema_json,
                output_schema_json,
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(Node {
            node_id,
            run_id: run_id.clone(),
            node_type,
            plugin_name: plugin_name.to_string(),
            plugin_version: plugin_version.to_string(),
            determinism,
            config_hash,
            position,
            input_schema,
            output_schema,
        })
    }

    /// Registers a directed edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when `(from_node_id, label)` already has
    /// an outgoing edge, or the insert otherwise fails.
    pub fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: EdgeMode,
    ) -> Result<Edge, LandscapeError> {
        let edge_id = EdgeId::new(new_id("edge"));
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, label, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge_id.as_str(),
                run_id.as_str(),
                from_node_id.as_str(),
                to_node_id.as_str(),
                label,
                edge_mode_to_str(mode),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(Edge {
            edge_id,
            run_id: run_id.clone(),
            from_node_id: from_node_id.clone(),
            to_node_id: to_node_id.clone(),
            label: label.to_string(),
            mode,
        })
    }

    // ------------------------------------------------------------------
    // Rows and tokens
    // ------------------------------------------------------------------

    /// Stores `bytes` in the configured payload store, returning its
    /// content hash. Returns `Ok(None)` when no payload store is
    /// configured, in which case the caller persists only a data hash.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the payload store write fails.
    pub fn store_payload(&self, bytes: &[u8]) -> Result<Option<HashDigest>, LandscapeError> {
        let Some(store) = &self.payload_store else {
            return Ok(None);
        };
        let hash = store.store(bytes).map_err(|err| LandscapeError::Io(err.to_string()))?;
        Ok(Some(hash))
    }

    /// Creates a row record for a value yielded by a source.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when `(run_id, source_node_id, row_index)`
    /// already exists, or the insert otherwise fails.
    pub fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        source_data_hash: HashDigest,
        payload_ref: Option<HashDigest>,
    ) -> Result<Row, LandscapeError> {
        let row_id = RowId::new(new_id("row"));
        let created_at = self.now();
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO rows_table (
                row_id, run_id, source_node_id, row_index, source_data_hash, payload_ref, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row_id.as_str(),
                run_id.as_str(),
                source_node_id.as_str(),
                u64_column(row_index)?,
                hash_column(&source_data_hash),
                payload_ref.as_ref().map(hash_column),
                timestamp_column(created_at),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        if let Some(journal) = self.db.change_journal() {
            journal.append(&crate::db::ChangeRecord {
                hash: Some(hash_column(&source_data_hash)),
                table: "rows_table",
                row_id: row_id.as_str(),
                payload_ref: payload_ref.as_ref().map(hash_column),
            })?;
        }
        Ok(Row {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            source_data_hash,
            payload_ref,
        })
    }

    /// Retrieves bytes previously written with [`Recorder::store_payload`].
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Io`] when no payload store is configured
    /// or the store read fails.
    pub fn retrieve_payload(&self, hash: &HashDigest) -> Result<Vec<u8>, LandscapeError> {
        let store = self
            .payload_store
            .as_ref()
            .ok_or_else(|| LandscapeError::Io("no payload store configured".to_string()))?;
        store.retrieve(hash).map_err(|err| LandscapeError::Io(err.to_string()))
    }

    /// Finds every row in `run_id` with no token that reached a terminal
    /// outcome, in row order. Resume re-enqueues these rows from the
    /// source's success edge.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the query fails.
    pub fn find_incomplete_rows(&self, run_id: &RunId) -> Result<Vec<Row>, LandscapeError> {
        let conn = self.db.writer();
        let mut statement = conn
            .prepare(
                "SELECT row_id, source_node_id, row_index, source_data_hash, payload_ref
                 FROM rows_table
                 WHERE run_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM tokens t
                       JOIN token_outcomes o ON o.token_id = t.token_id
                       WHERE t.row_id = rows_table.row_id AND o.is_terminal = 1
                   )
                 ORDER BY row_index",
            )
            .map_err(LandscapeError::from_rusqlite)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(LandscapeError::from_rusqlite)?;
        let mut incomplete = Vec::new();
        for row in rows {
            let (row_id, source_node_id, row_index, source_data_hash, payload_ref) = row.map_err(LandscapeError::from_rusqlite)?;
            incomplete.push(Row {
                row_id: RowId::new(row_id),
                run_id: run_id.clone(),
                source_node_id: NodeId::new(source_node_id),
                row_index: column_to_u64(row_index)?,
                source_data_hash: hash_from_column(&source_data_hash),
                payload_ref: payload_ref.as_deref().map(hash_from_column),
            });
        }
        Ok(incomplete)
    }

    /// Creates the initial token for a freshly created row.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn create_token(&self, run_id: &RunId, row_id: &RowId, step_in_pipeline: u32) -> Result<Token, LandscapeError> {
        let conn = self.db.writer();
        insert_token(&conn, self.now(), run_id, row_id, None, None, None, None, step_in_pipeline)
    }

    /// Forks a parent token into one child per branch, sharing a
    /// `fork_group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `branches` is empty.
    pub fn fork_token(
        &self,
        parent_token_id: &TokenId,
        row_id: &RowId,
        branches: &[String],
        step: u32,
    ) -> Result<Vec<Token>, LandscapeError> {
        if branches.is_empty() {
            return Err(LandscapeError::Integrity("fork requires at least one branch".to_string()));
        }
        let conn = self.db.writer();
        let run_id = lookup_token_run(&conn, parent_token_id)?;
        let fork_group_id = ForkGroupId::new(new_id("fork"));
        let mut children = Vec::with_capacity(branches.len());
        for (ordinal, branch) in branches.iter().enumerate() {
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| LandscapeError::Integrity("fork branch count exceeds u32".to_string()))?;
            let child = insert_token(
                &conn,
                self.now(),
                &run_id,
                row_id,
                Some(fork_group_id.clone()),
                None,
                None,
                Some(branch.clone()),
                step,
            )?;
            insert_token_parent(&conn, &child.token_id, parent_token_id, ordinal)?;
            children.push(child);
        }
        Ok(children)
    }

    /// Coalesces multiple parent tokens into one child, sharing a
    /// `join_group_id`; parent ordinals record arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `parents` is empty.
    pub fn coalesce_tokens(&self, parents: &[TokenId], row_id: &RowId, step: u32) -> Result<Token, LandscapeError> {
        if parents.is_empty() {
            return Err(LandscapeError::Integrity("coalesce requires at least one parent".to_string()));
        }
        let conn = self.db.writer();
        let run_id = lookup_token_run(&conn, &parents[0])?;
        let join_group_id = JoinGroupId::new(new_id("join"));
        let child = insert_token(&conn, self.now(), &run_id, row_id, None, Some(join_group_id), None, None, step)?;
        for (ordinal, parent) in parents.iter().enumerate() {
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| LandscapeError::Integrity("coalesce parent count exceeds u32".to_string()))?;
            insert_token_parent(&conn, &child.token_id, parent, ordinal)?;
        }
        Ok(child)
    }

    /// Expands a parent token into `count` children, sharing an
    /// `expand_group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when `count` is zero.
    pub fn expand_token(
        &self,
        parent_token_id: &TokenId,
        row_id: &RowId,
        count: u32,
        step: u32,
    ) -> Result<Vec<Token>, LandscapeError> {
        if count == 0 {
            return Err(LandscapeError::Integrity("expand requires count > 0".to_string()));
        }
        let conn = self.db.writer();
        let run_id = lookup_token_run(&conn, parent_token_id)?;
        let expand_group_id = ExpandGroupId::new(new_id("expand"));
        let mut children = Vec::with_capacity(count as usize);
        for ordinal in 0..count {
            let child = insert_token(
                &conn,
                self.now(),
                &run_id,
                row_id,
                None,
                None,
                Some(expand_group_id.clone()),
                None,
                step,
            )?;
            insert_token_parent(&conn, &child.token_id, parent_token_id, ordinal)?;
            children.push(child);
        }
        Ok(children)
    }

    /// Returns every parent link for `child_token_id`, ordered by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the query fails.
    pub fn get_token_parents(&self, child_token_id: &TokenId) -> Result<Vec<TokenParent>, LandscapeError> {
        let conn = self.db.writer();
        load_token_parents(&conn, child_token_id)
    }

    // ------------------------------------------------------------------
    // Node states
    // ------------------------------------------------------------------

    /// Opens a node-state record for a token entering a node.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn begin_node_state(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        step_index: u32,
        attempt: u32,
        input_hash: HashDigest,
    ) -> Result<NodeState, LandscapeError> {
        let state_id = StateId::new(new_id("state"));
        let started_at = self.now();
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO node_states (
                state_id, run_id, token_id, node_id, step_index, attempt, status,
                input_hash, output_hash, started_at, completed_at, duration_ms, error_json, context_after_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, NULL, NULL, NULL, NULL)",
            params![
                state_id.as_str(),
                run_id.as_str(),
                token_id.as_str(),
                node_id.as_str(),
                u32_column(step_index),
                u32_column(attempt),
                node_state_status_to_str(NodeStateStatus::Open),
                hash_column(&input_hash),
                timestamp_column(started_at),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(NodeState {
            state_id,
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            step_index,
            attempt,
            status: NodeStateStatus::Open,
            input_hash,
            output_hash: None,
            started_at,
            completed_at: None,
            duration_ms: None,
            error_json: None,
            context_after_json: None,
        })
    }

    /// Completes an open node state as `completed` or `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] when `state_id` is unknown, or
    /// [`LandscapeError::Integrity`] when the state is not currently open.
    pub fn complete_node_state(&self, state_id: &StateId, completion: NodeStateCompletion) -> Result<NodeState, LandscapeError> {
        let conn = self.db.writer();
        let mut state = load_node_state(&conn, state_id)?;
        if state.status != NodeStateStatus::Open {
            return Err(LandscapeError::Integrity(format!("node state {state_id} is not open")));
        }
        let completed_at = self.now();
        let duration_ms = completed_at.saturating_millis_since(state.started_at);
        let (status, output_hash, error_json, context_after_json) = match completion {
            NodeStateCompletion::Completed { output_hash, context_after_json } => {
                (NodeStateStatus::Completed, Some(output_hash), None, context_after_json)
            }
            NodeStateCompletion::Failed { error_json } => (NodeStateStatus::Failed, None, Some(error_json), None),
        };
        conn.execute(
            "UPDATE node_states SET status = ?1, output_hash = ?2, completed_at = ?3, duration_ms = ?4,
                error_json = ?5, context_after_json = ?6 WHERE state_id = ?7",
            params![
                node_state_status_to_str(status),
                output_hash.as_ref().map(hash_column),
                timestamp_column(completed_at),
                u64_column(duration_ms)?,
                error_json,
                context_after_json,
                state_id.as_str(),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        state.status = status;
        state.output_hash = output_hash;
        state.completed_at = Some(completed_at);
        state.duration_ms = Some(duration_ms);
        state.error_json = error_json;
        state.context_after_json = context_after_json;
        Ok(state)
    }

    /// Returns every node state for `token_id`, ordered by `(step_index, attempt)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the query fails.
    pub fn get_node_states_for_token(&self, token_id: &TokenId) -> Result<Vec<NodeState>, LandscapeError> {
        let conn = self.db.writer();
        load_node_states_for_token(&conn, token_id)
    }

    // ------------------------------------------------------------------
    // Routing events
    // ------------------------------------------------------------------

    /// Records a single routing event under a fresh `routing_group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: EdgeMode,
        reason_hash: HashDigest,
    ) -> Result<RoutingEvent, LandscapeError> {
        let events = self.record_routing_events(
            state_id,
            &[RoutingEventInput {
                edge_id: edge_id.clone(),
                mode,
                reason_hash,
            }],
        )?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| LandscapeError::Integrity("routing event insert produced no rows".to_string()))
    }

    /// Records one or many routing events under a shared `routing_group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when `events` is empty or the insert fails.
    pub fn record_routing_events(&self, state_id: &StateId, events: &[RoutingEventInput]) -> Result<Vec<RoutingEvent>, LandscapeError> {
        if events.is_empty() {
            return Err(LandscapeError::Integrity("routing requires at least one destination".to_string()));
        }
        let routing_group_id = RoutingGroupId::new(new_id("routing"));
        let created_at = self.now();
        let conn = self.db.writer();
        let mut recorded = Vec::with_capacity(events.len());
        for (ordinal, input) in events.iter().enumerate() {
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| LandscapeError::Integrity("routing fanout exceeds u32".to_string()))?;
            let event_id = RoutingEventId::new(new_id("routing-event"));
            conn.execute(
                "INSERT INTO routing_events (event_id, state_id, edge_id, routing_group_id, ordinal, mode, reason_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event_id.as_str(),
                    state_id.as_str(),
                    input.edge_id.as_str(),
                    routing_group_id.as_str(),
                    u32_column(ordinal),
                    edge_mode_to_str(input.mode),
                    hash_column(&input.reason_hash),
                    timestamp_column(created_at),
                ],
            )
            .map_err(LandscapeError::from_rusqlite)?;
            recorded.push(RoutingEvent {
                event_id,
                state_id: state_id.clone(),
                edge_id: input.edge_id.clone(),
                routing_group_id: routing_group_id.clone(),
                ordinal,
                mode: input.mode,
                reason_hash: input.reason_hash.clone(),
            });
        }
        Ok(recorded)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Records an external call, persisting request/response bytes to the
    /// payload store when one is configured; stores only hashes otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the payload store or insert fails.
    #[allow(clippy::too_many_arguments, reason = "Mirrors the full Call record the recorder persists.")]
    pub fn record_call(
        &self,
        run_id: &RunId,
        state_id: Option<&StateId>,
        call_type: CallType,
        status: CallStatus,
        request_bytes: &[u8],
        response_bytes: Option<&[u8]>,
        latency_ms: u64,
        error_json: Option<String>,
    ) -> Result<Call, LandscapeError> {
        let request_hash = elspeth_core::hashing::hash_bytes(HashAlgorithm::Sha256, request_bytes);
        let (request_payload_ref, response_payload_ref) = if let Some(store) = &self.payload_store {
            let request_ref = store
                .store(request_bytes)
                .map_err(|err| LandscapeError::Io(err.to_string()))?;
            let response_ref = response_bytes
                .map(|bytes| store.store(bytes))
                .transpose()
                .map_err(|err| LandscapeError::Io(err.to_string()))?;
            (Some(request_ref), response_ref)
        } else {
            (None, None)
        };
        let call_id = CallId::new(new_id("call"));
        let recorded_at = self.now();
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO calls (
                call_id, run_id, state_id, call_type, status, request_hash,
                request_payload_ref, response_payload_ref, latency_ms, error_json, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                call_id.as_str(),
                run_id.as_str(),
                state_id.map(elspeth_core::StateId::as_str),
                call_type_to_str(call_type),
                call_status_to_str(status),
                hash_column(&request_hash),
                request_payload_ref.as_ref().map(hash_column),
                response_payload_ref.as_ref().map(hash_column),
                u64_column(latency_ms)?,
                error_json,
                timestamp_column(recorded_at),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(Call {
            call_id,
            run_id: run_id.clone(),
            state_id: state_id.cloned(),
            call_type,
            status,
            request_hash,
            request_payload_ref,
            response_payload_ref,
            latency_ms,
            error_json,
            recorded_at,
        })
    }

    // ------------------------------------------------------------------
    // Token outcomes
    // ------------------------------------------------------------------

    /// Records a token's outcome. Idempotent for non-terminal outcomes; a
    /// second terminal outcome for the same token is an integrity failure.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] when the token already has a
    /// terminal outcome recorded.
    pub fn record_token_outcome(
        &self,
        token_id: &TokenId,
        run_id: &RunId,
        kind: TokenOutcomeKind,
        detail_json: Option<String>,
    ) -> Result<TokenOutcome, LandscapeError> {
        let conn = self.db.writer();
        let existing: Option<String> = conn
            .query_row(
                "SELECT kind FROM token_outcomes WHERE token_id = ?1 AND is_terminal = 1",
                params![token_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LandscapeError::from_rusqlite)?;
        if existing.is_some() {
            return Err(LandscapeError::Integrity(format!(
                "token {token_id} already has a terminal outcome"
            )));
        }
        let recorded_at = self.now();
        let is_terminal = kind.is_terminal();
        conn.execute(
            "INSERT INTO token_outcomes (token_id, run_id, kind, is_terminal, recorded_at, detail_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(token_id) DO UPDATE SET
                kind = excluded.kind,
                is_terminal = excluded.is_terminal,
                recorded_at = excluded.recorded_at,
                detail_json = excluded.detail_json",
            params![
                token_id.as_str(),
                run_id.as_str(),
                token_outcome_kind_to_str(kind),
                i64::from(is_terminal),
                timestamp_column(recorded_at),
                detail_json,
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(TokenOutcome {
            token_id: token_id.clone(),
            run_id: run_id.clone(),
            kind,
            is_terminal,
            recorded_at,
            detail_json,
        })
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Creates a new draft batch for an aggregation node.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn create_batch(&self, run_id: &RunId, aggregation_node_id: &NodeId, attempt: u32) -> Result<Batch, LandscapeError> {
        let batch_id = BatchId::new(new_id("batch"));
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO batches (batch_id, run_id, aggregation_node_id, attempt, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                batch_id.as_str(),
                run_id.as_str(),
                aggregation_node_id.as_str(),
                u32_column(attempt),
                batch_status_to_str(BatchStatus::Draft),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(Batch {
            batch_id,
            run_id: run_id.clone(),
            aggregation_node_id: aggregation_node_id.clone(),
            attempt,
            status: BatchStatus::Draft,
        })
    }

    /// Adds a token to a batch at the given ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn add_batch_member(&self, batch_id: &BatchId, token_id: &TokenId, ordinal: u32) -> Result<BatchMember, LandscapeError> {
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO batch_members (batch_id, token_id, ordinal) VALUES (?1, ?2, ?3)",
            params![batch_id.as_str(), token_id.as_str(), u32_column(ordinal)],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(BatchMember {
            batch_id: batch_id.clone(),
            token_id: token_id.clone(),
            ordinal,
        })
    }

    /// Transitions a batch to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] when `batch_id` is unknown.
    pub fn set_batch_status(&self, batch_id: &BatchId, status: BatchStatus) -> Result<(), LandscapeError> {
        let conn = self.db.writer();
        let updated = conn
            .execute(
                "UPDATE batches SET status = ?1 WHERE batch_id = ?2",
                params![batch_status_to_str(status), batch_id.as_str()],
            )
            .map_err(LandscapeError::from_rusqlite)?;
        if updated == 0 {
            return Err(LandscapeError::NotFound(format!("batch {batch_id}")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation / transform errors
    // ------------------------------------------------------------------

    /// Records a row that failed source-side schema validation.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn record_validation_error(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_hash: HashDigest,
        row_data: &RowData,
        error_json: String,
    ) -> Result<ValidationErrorRecord, LandscapeError> {
        let validation_error_id = ValidationErrorId::new(new_id("validation-error"));
        let recorded_at = self.now();
        let row_data_json = serde_json::to_string(row_data).map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO validation_errors (
                validation_error_id, run_id, source_node_id, row_hash, row_data_json, error_json, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                validation_error_id.as_str(),
                run_id.as_str(),
                source_node_id.as_str(),
                hash_column(&row_hash),
                row_data_json,
                error_json,
                timestamp_column(recorded_at),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(ValidationErrorRecord {
            validation_error_id,
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_hash,
            row_data: row_data.clone(),
            error_json,
            recorded_at,
        })
    }

    /// Records a row a transform rejected via an error result.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the insert fails.
    pub fn record_transform_error(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        row_data: &RowData,
        error_json: String,
    ) -> Result<TransformErrorRecord, LandscapeError> {
        let transform_error_id = TransformErrorId::new(new_id("transform-error"));
        let recorded_at = self.now();
        let row_data_json = serde_json::to_string(row_data).map_err(|err| LandscapeError::Integrity(err.to_string()))?;
        let conn = self.db.writer();
        conn.execute(
            "INSERT INTO transform_errors (
                transform_error_id, run_id, token_id, node_id, row_data_json, error_json, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transform_error_id.as_str(),
                run_id.as_str(),
                token_id.as_str(),
                node_id.as_str(),
                row_data_json,
                error_json,
                timestamp_column(recorded_at),
            ],
        )
        .map_err(LandscapeError::from_rusqlite)?;
        Ok(TransformErrorRecord {
            transform_error_id,
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            row_data: row_data.clone(),
            error_json,
            recorded_at,
        })
    }

    // ------------------------------------------------------------------
    // Reproducibility
    // ------------------------------------------------------------------

    /// Computes a run's reproducibility grade by scanning its nodes'
    /// determinism. Any `nondeterministic`/`io_read`/`io_write` node
    /// downgrades the run to `replay_reproducible`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the query fails.
    pub fn compute_reproducibility_grade(&self, run_id: &RunId) -> Result<ReproducibilityGrade, LandscapeError> {
        let conn = self.db.writer();
        let mut statement = conn
            .prepare("SELECT determinism FROM nodes WHERE run_id = ?1")
            .map_err(LandscapeError::from_rusqlite)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(LandscapeError::from_rusqlite)?;
        let mut grade = ReproducibilityGrade::FullReproducible;
        for row in rows {
            let value = row.map_err(LandscapeError::from_rusqlite)?;
            let determinism = determinism_from_str(&value)?;
            if !determinism.allows_full_reproducibility() {
                grade = ReproducibilityGrade::ReplayReproducible;
            }
        }
        Ok(grade)
    }

    /// Computes the reproducibility grade and marks the run complete with
    /// `status`, in one call.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when either step fails.
    pub fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<Run, LandscapeError> {
        let grade = self.compute_reproducibility_grade(run_id)?;
        let completed_at = self.now();
        let conn = self.db.writer();
        let updated = conn
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2, reproducibility_grade = ?3 WHERE run_id = ?4",
                params![
                    run_status_to_str(status),
                    timestamp_column(completed_at),
                    reproducibility_grade_to_str(grade),
                    run_id.as_str(),
                ],
            )
            .map_err(LandscapeError::from_rusqlite)?;
        if updated == 0 {
            return Err(LandscapeError::NotFound(format!("run {run_id}")));
        }
        load_run(&conn, run_id)
    }
}

// ============================================================================
// SECTION: Shared Row-Mapping Helpers (used by recorder and lineage)
// ============================================================================

#[allow(clippy::too_many_arguments, reason = "Mirrors token_manager's create_initial_token/fork/coalesce/expand shape.")]
pub(crate) fn insert_token(
    conn: &Connection,
    created_at: Timestamp,
    run_id: &RunId,
    row_id: &RowId,
    fork_group_id: Option<ForkGroupId>,
    join_group_id: Option<JoinGroupId>,
    expand_group_id: Option<ExpandGroupId>,
    branch_name: Option<String>,
    step_in_pipeline: u32,
) -> Result<Token, LandscapeError> {
    let token_id = TokenId::new(new_id("token"));
    conn.execute(
        "INSERT INTO tokens (
            token_id, run_id, row_id, fork_group_id, join_group_id, expand_group_id,
            branch_name, step_in_pipeline, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            token_id.as_str(),
            run_id.as_str(),
            row_id.as_str(),
            fork_group_id.as_ref().map(elspeth_core::ForkGroupId::as_str),
            join_group_id.as_ref().map(elspeth_core::JoinGroupId::as_str),
            expand_group_id.as_ref().map(elspeth_core::ExpandGroupId::as_str),
            branch_name,
            u32_column(step_in_pipeline),
            timestamp_column(created_at),
        ],
    )
    .map_err(LandscapeError::from_rusqlite)?;
    Ok(Token {
        token_id,
        run_id: run_id.clone(),
        row_id: row_id.clone(),
        fork_group_id,
        join_group_id,
        expand_group_id,
        branch_name,
        step_in_pipeline,
    })
}

pub(crate) fn insert_token_parent(conn: &Connection, child_token_id: &TokenId, parent_token_id: &TokenId, ordinal: u32) -> Result<(), LandscapeError> {
    conn.execute(
        "INSERT INTO token_parents (child_token_id, parent_token_id, ordinal) VALUES (?1, ?2, ?3)",
        params![child_token_id.as_str(), parent_token_id.as_str(), u32_column(ordinal)],
    )
    .map_err(LandscapeError::from_rusqlite)?;
    Ok(())
}

pub(crate) fn lookup_token_run(conn: &Connection, token_id: &TokenId) -> Result<RunId, LandscapeError> {
    conn.query_row("SELECT run_id FROM tokens WHERE token_id = ?1", params![token_id.as_str()], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .map(|value| RunId::new(value))
    .ok_or_else(|| LandscapeError::NotFound(format!("token {token_id}")))
}

pub(crate) fn load_token_parents(conn: &Connection, child_token_id: &TokenId) -> Result<Vec<TokenParent>, LandscapeError> {
    let mut statement = conn
        .prepare("SELECT child_token_id, parent_token_id, ordinal FROM token_parents WHERE child_token_id = ?1 ORDER BY ordinal")
        .map_err(LandscapeError::from_rusqlite)?;
    let rows = statement
        .query_map(params![child_token_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })
        .map_err(LandscapeError::from_rusqlite)?;
    let mut parents = Vec::new();
    for row in rows {
        let (child, parent, ordinal) = row.map_err(LandscapeError::from_rusqlite)?;
        parents.push(TokenParent {
            child_token_id: TokenId::new(child),
            parent_token_id: TokenId::new(parent),
            ordinal: column_to_u32(ordinal)?,
        });
    }
    Ok(parents)
}

pub(crate) fn load_run(conn: &Connection, run_id: &RunId) -> Result<Run, LandscapeError> {
    conn.query_row(
        "SELECT config_json, config_hash, canonical_version, started_at, completed_at, status,
                reproducibility_grade, export_status FROM runs WHERE run_id = ?1",
        params![run_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        },
    )
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .ok_or_else(|| LandscapeError::NotFound(format!("run {run_id}")))
    .and_then(
        |(config_json, config_hash, canonical_version, started_at, completed_at, status, grade, export_status)| {
            Ok(Run {
                run_id: run_id.clone(),
                config_json,
                config_hash: hash_from_column(&config_hash),
                canonical_version,
                started_at: timestamp_from_column(&started_at)?,
                completed_at: completed_at.as_deref().map(timestamp_from_column).transpose()?,
                status: run_status_from_str(&status)?,
                reproducibility_grade: grade.as_deref().map(reproducibility_grade_from_str).transpose()?,
                export_status: export_status_from_str(&export_status)?,
            })
        },
    )
}

pub(crate) fn load_node_state(conn: &Connection, state_id: &StateId) -> Result<NodeState, LandscapeError> {
    conn.query_row(
        "SELECT run_id, token_id, node_id, step_index, attempt, status, input_hash, output_hash,
                started_at, completed_at, duration_ms, error_json, context_after_json
         FROM node_states WHERE state_id = ?1",
        params![state_id.as_str()],
        map_node_state_row,
    )
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .ok_or_else(|| LandscapeError::NotFound(format!("node state {state_id}")))?
    .map(|row| row.into_node_state(state_id.clone()))
}

pub(crate) fn load_node_states_for_token(conn: &Connection, token_id: &TokenId) -> Result<Vec<NodeState>, LandscapeError> {
    let mut statement = conn
        .prepare(
            "SELECT state_id, run_id, token_id, node_id, step_index, attempt, status, input_hash, output_hash,
                    started_at, completed_at, duration_ms, error_json, context_after_json
             FROM node_states WHERE token_id = ?1 ORDER BY step_index, attempt",
        )
        .map_err(LandscapeError::from_rusqlite)?;
    let rows = statement
        .query_map(params![token_id.as_str()], |row| {
            let state_id: String = row.get(0)?;
            let rest = map_node_state_row_from_offset(row, 1)?;
            Ok((state_id, rest))
        })
        .map_err(LandscapeError::from_rusqlite)?;
    let mut states = Vec::new();
    for row in rows {
        let (state_id, raw) = row.map_err(LandscapeError::from_rusqlite)?;
        states.push(raw?.into_node_state(StateId::new(state_id)));
    }
    Ok(states)
}

struct RawNodeState {
    run_id: String,
    token_id: String,
    node_id: String,
    step_index: i64,
    attempt: i64,
    status: String,
    input_hash: String,
    output_hash: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_json: Option<String>,
    context_after_json: Option<String>,
}

impl RawNodeState {
    fn into_node_state(self, state_id: StateId) -> Result<NodeState, LandscapeError> {
        Ok(NodeState {
            state_id,
            run_id: RunId::new(self.run_id),
            token_id: TokenId::new(self.token_id),
            node_id: NodeId::new(self.node_id),
            step_index: column_to_u32(self.step_index)?,
            attempt: column_to_u32(self.attempt)?,
            status: node_state_status_from_str(&self.status)?,
            input_hash: hash_from_column(&self.input_hash),
            output_hash: self.output_hash.as_deref().map(hash_from_column),
            started_at: timestamp_from_column(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(timestamp_from_column).transpose()?,
            duration_ms: self.duration_ms.map(column_to_u64).transpose()?,
            error_json: self.error_json,
            context_after_json: self.context_after_json,
        })
    }
}

fn map_node_state_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<RawNodeState, LandscapeError>> {
    map_node_state_row_from_offset(row, 0)
}

fn map_node_state_row_from_offset(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Result<RawNodeState, LandscapeError>> {
    Ok(Ok(RawNodeState {
        run_id: row.get(offset)?,
        token_id: row.get(offset + 1)?,
        node_id: row.get(offset + 2)?,
        step_index: row.get(offset + 3)?,
        attempt: row.get(offset + 4)?,
        status: row.get(offset + 5)?,
        input_hash: row.get(offset + 6)?,
        output_hash: row.get(offset + 7)?,
        started_at: row.get(offset + 8)?,
        completed_at: row.get(offset + 9)?,
        duration_ms: row.get(offset + 10)?,
        error_json: row.get(offset + 11)?,
        context_after_json: row.get(offset + 12)?,
    }))
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
    use elspeth_core::core::time::SystemClock;

    use super::*;
    use crate::db::LandscapeConfig;

    fn test_recorder() -> (tempfile::TempDir, Recorder) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).unwrap());
        let recorder = Recorder::new(db, None, Arc::new(SystemClock));
        (dir, recorder)
    }

    #[test]
    fn begin_and_complete_run_round_trips() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        recorder.complete_run(&run.run_id, RunStatus::Completed).unwrap();
        let loaded = recorder.get_run(&run.run_id).unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn fork_token_with_empty_branches_is_fatal() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        let node = recorder
            .register_node(
                &run.run_id,
                NodeType::Source,
                "inline",
                "0.1.0",
                Determinism::Deterministic,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(0),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        let row = recorder
            .create_row(&run.run_id, &node.node_id, 0, HashDigest::new(HashAlgorithm::Sha256, b"row"), None)
            .unwrap();
        let token = recorder.create_token(&run.run_id, &row.row_id, 0).unwrap();
        let result = recorder.fork_token(&token.token_id, &row.row_id, &[], 1);
        assert!(matches!(result, Err(LandscapeError::Integrity(_))));
    }

    #[test]
    fn fork_token_shares_fork_group_and_records_parentage() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        let node = recorder
            .register_node(
                &run.run_id,
                NodeType::Source,
                "inline",
                "0.1.0",
                Determinism::Deterministic,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(0),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        let row = recorder
            .create_row(&run.run_id, &node.node_id, 0, HashDigest::new(HashAlgorithm::Sha256, b"row"), None)
            .unwrap();
        let token = recorder.create_token(&run.run_id, &row.row_id, 0).unwrap();
        let children = recorder
            .fork_token(&token.token_id, &row.row_id, &["left".to_string(), "right".to_string()], 1)
            .unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].fork_group_id, children[1].fork_group_id);
        let parents = recorder.get_token_parents(&children[1].token_id).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].parent_token_id, token.token_id);
    }

    #[test]
    fn second_terminal_outcome_is_rejected() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        let node = recorder
            .register_node(
                &run.run_id,
                NodeType::Source,
                "inline",
                "0.1.0",
                Determinism::Deterministic,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(0),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        let row = recorder
            .create_row(&run.run_id, &node.node_id, 0, HashDigest::new(HashAlgorithm::Sha256, b"row"), None)
            .unwrap();
        let token = recorder.create_token(&run.run_id, &row.row_id, 0).unwrap();
        recorder
            .record_token_outcome(&token.token_id, &run.run_id, TokenOutcomeKind::Completed, None)
            .unwrap();
        let second = recorder.record_token_outcome(&token.token_id, &run.run_id, TokenOutcomeKind::Failed, None);
        assert!(matches!(second, Err(LandscapeError::Integrity(_))));
    }

    #[test]
    fn non_terminal_outcome_is_idempotent() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        let node = recorder
            .register_node(
                &run.run_id,
                NodeType::Coalesce,
                "coalesce",
                "0.1.0",
                Determinism::Deterministic,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(1),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        let row = recorder
            .create_row(&run.run_id, &node.node_id, 0, HashDigest::new(HashAlgorithm::Sha256, b"row"), None)
            .unwrap();
        let token = recorder.create_token(&run.run_id, &row.row_id, 0).unwrap();
        recorder
            .record_token_outcome(&token.token_id, &run.run_id, TokenOutcomeKind::Buffered, None)
            .unwrap();
        recorder
            .record_token_outcome(&token.token_id, &run.run_id, TokenOutcomeKind::Buffered, None)
            .unwrap();
    }

    #[test]
    fn reproducibility_grade_downgrades_on_nondeterministic_node() {
        let (_dir, recorder) = test_recorder();
        let run = recorder.begin_run(&serde_json::json!({})).unwrap();
        recorder
            .register_node(
                &run.run_id,
                NodeType::Source,
                "inline",
                "0.1.0",
                Determinism::Deterministic,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg"),
                Some(0),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        recorder
            .register_node(
                &run.run_id,
                NodeType::Transform,
                "http",
                "0.1.0",
                Determinism::IoRead,
                HashDigest::new(HashAlgorithm::Sha256, b"cfg2"),
                Some(1),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
                SchemaContract::open(elspeth_core::core::schema::SchemaMode::Flexible),
            )
            .unwrap();
        let grade = recorder.compute_reproducibility_grade(&run.run_id).unwrap();
        assert_eq!(grade, ReproducibilityGrade::ReplayReproducible);
    }
}
