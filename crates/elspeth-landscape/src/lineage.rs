// crates/elspeth-landscape/src/lineage.rs
// ============================================================================
// Module: Lineage / Explain
// Description: Pure read-side projections over the audit schema.
// Purpose: Answer "what happened to this row" without touching the writer.
// Dependencies: elspeth-core, elspeth-landscape::db
// ============================================================================

//! ## Overview
//! Every function here opens its own [`crate::db::Database::read_only_connection`]
//! and never touches the writer mutex, so lineage queries never contend
//! with an in-progress run (`spec.md` §4.12). A row that forked into
//! multiple terminal tokens is ambiguous without a `sink` filter;
//! [`explain_row`] signals this via [`LineageError::AmbiguousTerminalTokens`]
//! rather than guessing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::model::Call;
use elspeth_core::core::model::NodeState;
use elspeth_core::core::model::Row;
use elspeth_core::core::model::RoutingEvent;
use elspeth_core::core::model::TokenOutcome;
use elspeth_core::core::model::TransformErrorRecord;
use elspeth_core::core::model::ValidationErrorRecord;
use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::TokenId;
use elspeth_store::PayloadStore;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::db::Database;
use crate::db::LandscapeError;
use crate::recorder;

// ============================================================================
// SECTION: Lineage Types
// ============================================================================

/// A source row's metadata plus its data when the payload store still has
/// it (or it was small enough to be hashed-only and never stored).
#[derive(Debug, Clone)]
pub struct SourceRowView {
    /// The row record.
    pub row: Row,
    /// `true` when the row's payload is still retrievable from the payload
    /// store; `false` after purge.
    pub payload_available: bool,
    /// The row's raw bytes, if retrieved.
    pub payload: Option<Vec<u8>>,
}

/// One external call's view, with bodies attached when the payload store
/// still has them.
#[derive(Debug, Clone)]
pub struct CallView {
    /// The call record.
    pub call: Call,
    /// Request body bytes, if retrieved.
    pub request_payload: Option<Vec<u8>>,
    /// Response body bytes, if retrieved.
    pub response_payload: Option<Vec<u8>>,
}

/// Routing events grouped under a shared `routing_group_id`.
#[derive(Debug, Clone)]
pub struct RoutingGroupView {
    /// The events in this group, ordered by ordinal.
    pub events: Vec<RoutingEvent>,
}

/// Full explanation of a single token's journey through the pipeline.
#[derive(Debug, Clone)]
pub struct RowLineage {
    /// The row the explained token traces back to.
    pub source_row: SourceRowView,
    /// Node states in `(step_index, attempt)` order.
    pub node_states: Vec<NodeState>,
    /// Routing events, grouped by `routing_group_id` in first-seen order.
    pub routing_groups: Vec<RoutingGroupView>,
    /// External calls made on behalf of this token's node states.
    pub calls: Vec<CallView>,
    /// Validation errors recorded against the source row.
    pub validation_errors: Vec<ValidationErrorRecord>,
    /// Transform errors recorded against this token.
    pub transform_errors: Vec<TransformErrorRecord>,
    /// The token's terminal outcome, if one has been recorded.
    pub terminal_outcome: Option<TokenOutcome>,
}

/// Errors raised while building a [`RowLineage`].
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// Underlying database error.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// The requested row or token does not exist.
    #[error("lineage target not found: {0}")]
    NotFound(String),
    /// The row forked into multiple terminal tokens; a `sink` filter is
    /// required to disambiguate which one to explain.
    #[error("row {0} has multiple terminal tokens; pass a sink filter")]
    AmbiguousTerminalTokens(RowId),
}

// ============================================================================
// SECTION: Explain
// ============================================================================

/// Explains a single token's full lineage.
///
/// # Errors
///
/// Returns [`LineageError::NotFound`] when `token_id` does not exist.
pub fn explain_token(db: &Database, payload_store: Option<&dyn PayloadStore>, token_id: &TokenId) -> Result<RowLineage, LineageError> {
    let conn = db.read_only_connection().map_err(LineageError::Landscape)?;
    let row_id = load_token_row(&conn, token_id)?;
    let row = load_row(&conn, &row_id)?;
    let source_row = attach_row_payload(row, payload_store);

    let node_states = recorder::load_node_states_for_token(&conn, token_id).map_err(LineageError::Landscape)?;

    let routing_groups = load_routing_groups(&conn, &node_states)?;
    let calls = load_calls_for_states(&conn, &node_states, payload_store)?;
    let validation_errors = load_validation_errors(&conn, &row_id)?;
    let transform_errors = load_transform_errors(&conn, token_id)?;
    let terminal_outcome = load_terminal_outcome(&conn, token_id)?;

    Ok(RowLineage {
        source_row,
        node_states,
        routing_groups,
        calls,
        validation_errors,
        transform_errors,
        terminal_outcome,
    })
}

/// Explains a row's lineage. When `sink` is `None` and the row forked into
/// more than one terminal token, returns
/// [`LineageError::AmbiguousTerminalTokens`] instead of guessing which
/// branch to follow.
///
/// # Errors
///
/// Returns [`LineageError::NotFound`] when `row_id` does not exist, or
/// [`LineageError::AmbiguousTerminalTokens`] per the rule above.
pub fn explain_row(
    db: &Database,
    payload_store: Option<&dyn PayloadStore>,
    run_id: &RunId,
    row_id: &RowId,
    sink: Option<&str>,
) -> Result<RowLineage, LineageError> {
    let conn = db.read_only_connection().map_err(LineageError::Landscape)?;
    let terminal_tokens = load_terminal_tokens_for_row(&conn, run_id, row_id)?;
    let chosen = match (terminal_tokens.as_slice(), sink) {
        ([], _) => return Err(LineageError::NotFound(format!("row {row_id} has no terminal token yet"))),
        ([only], _) => only.clone(),
        (_, Some(sink_name)) => terminal_tokens
            .into_iter()
            .find(|(_, detail)| detail.as_deref() == Some(sink_name))
            .map(|(token_id, _)| token_id)
            .ok_or_else(|| LineageError::NotFound(format!("no terminal token for row {row_id} at sink {sink_name}")))?,
        (_, None) => return Err(LineageError::AmbiguousTerminalTokens(row_id.clone())),
    };
    drop(conn);
    explain_token(db, payload_store, &chosen)
}

// ============================================================================
// SECTION: Query Helpers
// ============================================================================

fn load_token_row(conn: &Connection, token_id: &TokenId) -> Result<RowId, LineageError> {
    conn.query_row("SELECT row_id FROM tokens WHERE token_id = ?1", params![token_id.as_str()], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .map(RowId::new)
    .ok_or_else(|| LineageError::NotFound(format!("token {token_id}")))
}

fn load_row(conn: &Connection, row_id: &RowId) -> Result<Row, LineageError> {
    conn.query_row(
        "SELECT run_id, source_node_id, row_index, source_data_hash, payload_ref FROM rows_table WHERE row_id = ?1",
        params![row_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    )
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .ok_or_else(|| LineageError::NotFound(format!("row {row_id}")))
    .map(|(run_id, source_node_id, row_index, hash, payload_ref)| Row {
        row_id: row_id_unchanged(row_id.clone()),
        run_id: elspeth_core::RunId::new(run_id),
        source_node_id: elspeth_core::NodeId::new(source_node_id),
        row_index: u64::try_from(row_index).unwrap_or_default(),
        source_data_hash: elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, hash),
        payload_ref: payload_ref.map(|value| elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, value)),
    })
}

fn row_id_unchanged(value: String) -> RowId {
    RowId::new(value)
}

fn attach_row_payload(row: Row, payload_store: Option<&dyn PayloadStore>) -> SourceRowView {
    let payload = row
        .payload_ref
        .as_ref()
        .zip(payload_store)
        .and_then(|(hash, store)| store.retrieve(hash).ok());
    let payload_available = row.payload_ref.is_some() && payload.is_some();
    SourceRowView {
        row,
        payload_available,
        payload,
    }
}

fn load_routing_groups(conn: &Connection, node_states: &[NodeState]) -> Result<Vec<RoutingGroupView>, LineageError> {
    let mut groups: Vec<RoutingGroupView> = Vec::new();
    for state in node_states {
        let mut statement = conn
            .prepare(
                "SELECT event_id, edge_id, routing_group_id, ordinal, mode, reason_hash
                 FROM routing_events WHERE state_id = ?1 ORDER BY routing_group_id, ordinal",
            )
            .map_err(LandscapeError::from_rusqlite)?;
        let rows = statement
            .query_map(params![state.state_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(LandscapeError::from_rusqlite)?;
        for row in rows {
            let (event_id, edge_id, routing_group_id, ordinal, mode, reason_hash) = row.map_err(LandscapeError::from_rusqlite)?;
            let event = RoutingEvent {
                event_id: elspeth_core::RoutingEventId::new(event_id),
                state_id: state.state_id.clone(),
                edge_id: elspeth_core::EdgeId::new(edge_id),
                routing_group_id: elspeth_core::RoutingGroupId::new(routing_group_id.clone()),
                ordinal: u32::try_from(ordinal).unwrap_or_default(),
                mode: match mode.as_str() {
                    "copy" => elspeth_core::EdgeMode::Copy,
                    _ => elspeth_core::EdgeMode::Move,
                },
                reason_hash: reason_hash
                    .map(|value| elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, value))
                    .unwrap_or_else(|| elspeth_core::HashDigest::new(elspeth_core::HashAlgorithm::Sha256, b"")),
            };
            match groups.iter_mut().find(|group| {
                group
                    .events
                    .first()
                    .is_some_and(|existing| existing.routing_group_id == event.routing_group_id)
            }) {
                Some(group) => group.events.push(event),
                None => groups.push(RoutingGroupView { events: vec![event] }),
            }
        }
    }
    Ok(groups)
}

fn load_calls_for_states(
    conn: &Connection,
    node_states: &[NodeState],
    payload_store: Option<&dyn PayloadStore>,
) -> Result<Vec<CallView>, LineageError> {
    let mut views = Vec::new();
    for state in node_states {
        let mut statement = conn
            .prepare(
                "SELECT call_id, run_id, call_type, status, request_hash, request_payload_ref,
                        response_payload_ref, latency_ms, error_json, recorded_at
                 FROM calls WHERE state_id = ?1 ORDER BY recorded_at",
            )
            .map_err(LandscapeError::from_rusqlite)?;
        let rows = statement
            .query_map(params![state.state_id.as_str()], map_call_row)
            .map_err(LandscapeError::from_rusqlite)?;
        for row in rows {
            let call = row.map_err(LandscapeError::from_rusqlite)??;
            let request_payload = call
                .request_payload_ref
                .as_ref()
                .zip(payload_store)
                .and_then(|(hash, store)| store.retrieve(hash).ok());
            let response_payload = call
                .response_payload_ref
                .as_ref()
                .zip(payload_store)
                .and_then(|(hash, store)| store.retrieve(hash).ok());
            views.push(CallView {
                call,
                request_payload,
                response_payload,
            });
        }
    }
    Ok(views)
}

fn map_call_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Call, LineageError>> {
    let call_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let call_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let request_hash: String = row.get(4)?;
    let request_payload_ref: Option<String> = row.get(5)?;
    let response_payload_ref: Option<String> = row.get(6)?;
    let latency_ms: i64 = row.get(7)?;
    let error_json: Option<String> = row.get(8)?;
    let recorded_at: String = row.get(9)?;
    Ok((|| {
        Ok(Call {
            call_id: elspeth_core::CallId::new(call_id),
            run_id: elspeth_core::RunId::new(run_id),
            state_id: None,
            call_type: match call_type.as_str() {
                "http" => elspeth_core::CallType::Http,
                "sql" => elspeth_core::CallType::Sql,
                "filesystem" => elspeth_core::CallType::Filesystem,
                _ => elspeth_core::CallType::Llm,
            },
            status: if status == "error" {
                elspeth_core::CallStatus::Error
            } else {
                elspeth_core::CallStatus::Success
            },
            request_hash: elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, request_hash),
            request_payload_ref: request_payload_ref.map(|value| elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, value)),
            response_payload_ref: response_payload_ref
                .map(|value| elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, value)),
            latency_ms: u64::try_from(latency_ms).unwrap_or_default(),
            error_json,
            recorded_at: elspeth_core::Timestamp::parse_rfc3339(&recorded_at)
                .map_err(|err| LineageError::Landscape(LandscapeError::Integrity(err.to_string())))?,
        })
    })())
}

fn load_validation_errors(conn: &Connection, row_id: &RowId) -> Result<Vec<ValidationErrorRecord>, LineageError> {
    let row_hash: Option<String> = conn
        .query_row("SELECT source_data_hash FROM rows_table WHERE row_id = ?1", params![row_id.as_str()], |row| {
            row.get(0)
        })
        .optional()
        .map_err(LandscapeError::from_rusqlite)?;
    let Some(row_hash) = row_hash else {
        return Ok(Vec::new());
    };
    let mut statement = conn
        .prepare(
            "SELECT validation_error_id, run_id, source_node_id, row_data_json, error_json, recorded_at
             FROM validation_errors WHERE row_hash = ?1 ORDER BY recorded_at",
        )
        .map_err(LandscapeError::from_rusqlite)?;
    let rows = statement
        .query_map(params![row_hash.clone()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(LandscapeError::from_rusqlite)?;
    let mut records = Vec::new();
    for row in rows {
        let (id, run_id, source_node_id, row_data_json, error_json, recorded_at) = row.map_err(LandscapeError::from_rusqlite)?;
        records.push(ValidationErrorRecord {
            validation_error_id: elspeth_core::ValidationErrorId::new(id),
            run_id: elspeth_core::RunId::new(run_id),
            source_node_id: elspeth_core::NodeId::new(source_node_id),
            row_hash: elspeth_core::HashDigest::from_hex(elspeth_core::HashAlgorithm::Sha256, row_hash.clone()),
            row_data: serde_json::from_str(&row_data_json).map_err(|err| LandscapeError::Integrity(err.to_string()))?,
            error_json,
            recorded_at: elspeth_core::Timestamp::parse_rfc3339(&recorded_at).map_err(|err| LandscapeError::Integrity(err.to_string()))?,
        });
    }
    Ok(records)
}

fn load_transform_errors(conn: &Connection, token_id: &TokenId) -> Result<Vec<TransformErrorRecord>, LineageError> {
    let mut statement = conn
        .prepare(
            "SELECT transform_error_id, run_id, node_id, row_data_json, error_json, recorded_at
             FROM transform_errors WHERE token_id = ?1 ORDER BY recorded_at",
        )
        .map_err(LandscapeError::from_rusqlite)?;
    let rows = statement
        .query_map(params![token_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(LandscapeError::from_rusqlite)?;
    let mut records = Vec::new();
    for row in rows {
        let (id, run_id, node_id, row_data_json, error_json, recorded_at) = row.map_err(LandscapeError::from_rusqlite)?;
        records.push(TransformErrorRecord {
            transform_error_id: elspeth_core::TransformErrorId::new(id),
            run_id: elspeth_core::RunId::new(run_id),
            token_id: token_id.clone(),
            node_id: elspeth_core::NodeId::new(node_id),
            row_data: serde_json::from_str(&row_data_json).map_err(|err| LandscapeError::Integrity(err.to_string()))?,
            error_json,
            recorded_at: elspeth_core::Timestamp::parse_rfc3339(&recorded_at).map_err(|err| LandscapeError::Integrity(err.to_string()))?,
        });
    }
    Ok(records)
}

fn load_terminal_outcome(conn: &Connection, token_id: &TokenId) -> Result<Option<TokenOutcome>, LineageError> {
    conn.query_row(
        "SELECT run_id, kind, is_terminal, recorded_at, detail_json FROM token_outcomes WHERE token_id = ?1",
        params![token_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    )
    .optional()
    .map_err(LandscapeError::from_rusqlite)?
    .map(|(run_id, kind, is_terminal, recorded_at, detail_json)| {
        Ok(TokenOutcome {
            token_id: token_id.clone(),
            run_id: elspeth_core::RunId::new(run_id),
            kind: outcome_kind_from_str(&kind),
            is_terminal: is_terminal != 0,
            recorded_at: elspeth_core::Timestamp::parse_rfc3339(&recorded_at).map_err(|err| LandscapeError::Integrity(err.to_string()))?,
            detail_json,
        })
    })
    .transpose()
    .map_err(LineageError::Landscape)
}

fn outcome_kind_from_str(value: &str) -> elspeth_core::TokenOutcomeKind {
    use elspeth_core::TokenOutcomeKind;
    match value {
        "routed" => TokenOutcomeKind::Routed,
        "failed" => TokenOutcomeKind::Failed,
        "forked" => TokenOutcomeKind::Forked,
        "coalesced" => TokenOutcomeKind::Coalesced,
        "expanded" => TokenOutcomeKind::Expanded,
        "buffered" => TokenOutcomeKind::Buffered,
        "consumed_in_batch" => TokenOutcomeKind::ConsumedInBatch,
        "quarantined" => TokenOutcomeKind::Quarantined,
        _ => TokenOutcomeKind::Completed,
    }
}

fn load_terminal_tokens_for_row(conn: &Connection, run_id: &RunId, row_id: &RowId) -> Result<Vec<(TokenId, Option<String>)>, LineageError> {
    let mut statement = conn
        .prepare(
            "SELECT o.token_id, o.detail_json FROM token_outcomes o
             JOIN tokens t ON t.token_id = o.token_id
             WHERE o.run_id = ?1 AND t.row_id = ?2 AND o.is_terminal = 1
             ORDER BY o.recorded_at",
        )
        .map_err(LandscapeError::from_rusqlite)?;
    let rows = statement
        .query_map(params![run_id.as_str(), row_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(LandscapeError::from_rusqlite)?;
    let mut tokens = Vec::new();
    for row in rows {
        let (token_id, detail) = row.map_err(LandscapeError::from_rusqlite)?;
        tokens.push((TokenId::new(token_id), detail));
    }
    Ok(tokens)
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
    use std::sync::Arc;

    use elspeth_core::core::schema::SchemaContract;
    use elspeth_core::core::schema::SchemaMode;
    use elspeth_core::core::time::SystemClock;
    use elspeth_core::Determinism;
    use elspeth_core::HashAlgorithm;
    use elspeth_core::HashDigest;
    use elspeth_core::NodeType;
    use elspeth_core::TokenOutcomeKind;

    use super::*;
    use crate::db::LandscapeConfig;
    use crate::recorder::Recorder;

    #[test]
    fn explain_row_rejects_ambiguous_forks_without_sink() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).unwrap());
        let recorder = Recorder::new(Arc::clone(&db), None, Arc::new(SystemClock));
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
                SchemaContract::open(SchemaMode::Flexible),
                SchemaContract::open(SchemaMode::Flexible),
            )
            .unwrap();
        let row = recorder
            .create_row(&run.run_id, &node.node_id, 0, HashDigest::new(HashAlgorithm::Sha256, b"row"), None)
            .unwrap();
        let token = recorder.create_token(&run.run_id, &row.row_id, 0).unwrap();
        let children = recorder
            .fork_token(&token.token_id, &row.row_id, &["left".to_string(), "right".to_string()], 1)
            .unwrap();
        for child in &children {
            recorder
                .record_token_outcome(&child.token_id, &run.run_id, TokenOutcomeKind::Completed, None)
                .unwrap();
        }
        let result = explain_row(&db, None, &run.run_id, &row.row_id, None);
        assert!(matches!(result, Err(LineageError::AmbiguousTerminalTokens(_))));
    }
}
