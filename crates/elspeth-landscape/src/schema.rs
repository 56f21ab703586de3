// crates/elspeth-landscape/src/schema.rs
// ============================================================================
// Module: Landscape Schema
// Description: SQLite DDL for the relational audit schema.
// Purpose: Define the append-only tables the recorder writes through.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! The audit schema is append-only: every mutating recorder call inserts a
//! new row, never updates one in place (except the two designated mutable
//! columns on `runs` — `status` and `export_status` — which track run
//! lifecycle rather than historical fact). Foreign keys scope every child
//! table back to its `run_id` so a whole run's audit trail can be dropped
//! atomically if ever required.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::db::LandscapeError;

// ============================================================================
// SECTION: Schema Version
// ============================================================================

/// Current schema version. Bump when DDL changes and add a migration arm
/// to [`initialize`].
pub const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// SECTION: DDL
// ============================================================================

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    config_json BLOB NOT NULL,
    config_hash TEXT NOT NULL,
    canonical_version TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    reproducibility_grade TEXT,
    export_status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    node_type TEXT NOT NULL,
    plugin_name TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    determinism TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    position INTEGER,
    input_schema_json TEXT NOT NULL,
    output_schema_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_run ON nodes (run_id);

CREATE TABLE IF NOT EXISTS edges (
    edge_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    from_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    to_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    label TEXT NOT NULL,
    mode TEXT NOT NULL,
    UNIQUE (from_node_id, label)
);
CREATE INDEX IF NOT EXISTS idx_edges_run ON edges (run_id);

CREATE TABLE IF NOT EXISTS rows_table (
    row_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    source_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_index INTEGER NOT NULL,
    source_data_hash TEXT NOT NULL,
    payload_ref TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (run_id, source_node_id, row_index)
);
CREATE INDEX IF NOT EXISTS idx_rows_run ON rows_table (run_id);

CREATE TABLE IF NOT EXISTS tokens (
    token_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    row_id TEXT NOT NULL REFERENCES rows_table(row_id),
    fork_group_id TEXT,
    join_group_id TEXT,
    expand_group_id TEXT,
    branch_name TEXT,
    step_in_pipeline INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_run ON tokens (run_id);
CREATE INDEX IF NOT EXISTS idx_tokens_row ON tokens (row_id);

CREATE TABLE IF NOT EXISTS token_parents (
    child_token_id TEXT NOT NULL REFERENCES tokens(token_id),
    parent_token_id TEXT NOT NULL REFERENCES tokens(token_id),
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (child_token_id, parent_token_id)
);
CREATE INDEX IF NOT EXISTS idx_token_parents_parent ON token_parents (parent_token_id);

CREATE TABLE IF NOT EXISTS node_states (
    state_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    step_index INTEGER NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    input_hash TEXT,
    output_hash TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    duration_ms INTEGER,
    error_json TEXT,
    context_after_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_node_states_token ON node_states (token_id, step_index, attempt);
CREATE INDEX IF NOT EXISTS idx_node_states_run ON node_states (run_id);

CREATE TABLE IF NOT EXISTS routing_events (
    event_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    edge_id TEXT NOT NULL REFERENCES edges(edge_id),
    routing_group_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    mode TEXT NOT NULL,
    reason_hash TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_routing_events_group ON routing_events (routing_group_id);
CREATE INDEX IF NOT EXISTS idx_routing_events_state ON routing_events (state_id);

CREATE TABLE IF NOT EXISTS token_outcomes (
    token_id TEXT PRIMARY KEY REFERENCES tokens(token_id),
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    kind TEXT NOT NULL,
    is_terminal INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    detail_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_token_outcomes_run ON token_outcomes (run_id);

CREATE TABLE IF NOT EXISTS batches (
    batch_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    aggregation_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batches_run ON batches (run_id);

CREATE TABLE IF NOT EXISTS batch_members (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (batch_id, token_id)
);

CREATE TABLE IF NOT EXISTS calls (
    call_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    state_id TEXT REFERENCES node_states(state_id),
    call_type TEXT NOT NULL,
    status TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request_payload_ref TEXT,
    response_payload_ref TEXT,
    latency_ms INTEGER NOT NULL,
    error_json TEXT,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_calls_run ON calls (run_id);
CREATE INDEX IF NOT EXISTS idx_calls_state ON calls (state_id);

CREATE TABLE IF NOT EXISTS validation_errors (
    validation_error_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    source_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_hash TEXT NOT NULL,
    row_data_json TEXT NOT NULL,
    error_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_validation_errors_run ON validation_errors (run_id);

CREATE TABLE IF NOT EXISTS transform_errors (
    transform_error_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_data_json TEXT NOT NULL,
    error_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transform_errors_run ON transform_errors (run_id);
";

// ============================================================================
// SECTION: Initialization
// ============================================================================

/// Creates the schema (if absent) and records the schema version, or
/// validates an existing database's version.
///
/// # Errors
///
/// Returns [`LandscapeError`] when the schema cannot be created, or when
/// an on-disk database carries an unsupported schema version.
pub fn initialize(connection: &mut Connection) -> Result<(), LandscapeError> {
    let tx = connection.transaction().map_err(LandscapeError::from_rusqlite)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);")
        .map_err(LandscapeError::from_rusqlite)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM schema_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(LandscapeError::from_rusqlite)?;
    match version {
        None => {
            tx.execute_batch(CREATE_TABLES).map_err(LandscapeError::from_rusqlite)?;
            tx.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(LandscapeError::from_rusqlite)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(LandscapeError::VersionMismatch {
                found: value,
                expected: SCHEMA_VERSION,
            });
        }
    }
    tx.commit().map_err(LandscapeError::from_rusqlite)?;
    Ok(())
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
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize(&mut connection).unwrap();
        initialize(&mut connection).unwrap();
    }
}
