// crates/elspeth-core/src/core/model.rs
// ============================================================================
// Module: Elspeth Audit Data Model
// Description: Run/Node/Edge/Row/Token/NodeState/RoutingEvent/Outcome/Batch/Call records.
// Purpose: Define the entities the Landscape recorder persists and every other
// component consumes.
// Dependencies: crate::core::{hashing, identifiers, schema, time, value}, serde
// ============================================================================

//! ## Overview
//! Every struct in this module is a plain, immutable-once-constructed record.
//! None of them validate themselves on construction beyond basic typing —
//! the invariants in `spec.md` §3 (e.g. "completed states have non-null
//! output_hash") are enforced at the single write path, the Landscape
//! recorder, not here. Treat these as the audit schema's Rust projection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::BatchId;
use crate::core::identifiers::CallId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::ExpandGroupId;
use crate::core::identifiers::ForkGroupId;
use crate::core::identifiers::JoinGroupId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RoutingEventId;
use crate::core::identifiers::RoutingGroupId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::identifiers::TransformErrorId;
use crate::core::identifiers::ValidationErrorId;
use crate::core::schema::SchemaContract;
use crate::core::time::Timestamp;
use crate::core::value::RowData;

// ============================================================================
// SECTION: Run
// ============================================================================

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is actively streaming rows.
    Running,
    /// The run completed (possibly with some row failures).
    Completed,
    /// The run failed outright (e.g. a graph validation or integrity error).
    Failed,
    /// The run was interrupted by a cooperative shutdown signal.
    Interrupted,
}

/// Reproducibility grade computed at run completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproducibilityGrade {
    /// Every node in the graph is `deterministic` or `seeded`.
    FullReproducible,
    /// At least one node is `nondeterministic`, `io_read`, or `io_write`.
    ReplayReproducible,
}

/// Export status for an independently-produced audit bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// No export has been produced.
    NotExported,
    /// An export is in progress.
    Exporting,
    /// An export completed successfully.
    Exported,
    /// The export attempt failed.
    ExportFailed,
}

/// Top-level container for a pipeline execution.
///
/// # Invariants
/// - Immutable after `status` leaves `Running`, except for export fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub run_id: RunId,
    /// Canonical-JSON serialized pipeline configuration.
    pub config_json: String,
    /// SHA-256 hash of `config_json`.
    pub config_hash: HashDigest,
    /// Canonical version tag in effect for this run.
    pub canonical_version: String,
    /// Wall-clock start time.
    pub started_at: Timestamp,
    /// Wall-clock completion time, set by `complete_run`.
    pub completed_at: Option<Timestamp>,
    /// Run lifecycle status.
    pub status: RunStatus,
    /// Reproducibility grade, set at completion.
    pub reproducibility_grade: Option<ReproducibilityGrade>,
    /// Independent export status.
    pub export_status: ExportStatus,
}

// ============================================================================
// SECTION: Node
// ============================================================================

/// The structural role a node plays in the execution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Produces rows.
    Source,
    /// Maps or rejects rows.
    Transform,
    /// Routes rows by condition.
    Gate,
    /// Groups rows into batches (possibly emitting fewer rows than received).
    Aggregation,
    /// Merges parallel branches into one token.
    Coalesce,
    /// Terminal consumer of rows.
    Sink,
}

/// Declared determinism of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Determinism {
    /// Output depends only on input; replay always reproduces it.
    Deterministic,
    /// Output depends on input plus a recorded seed.
    Seeded,
    /// Output may vary run to run for reasons outside the recorded state.
    Nondeterministic,
    /// Reads external state (e.g. wall clock, filesystem, network).
    IoRead,
    /// Writes external state.
    IoWrite,
}

impl Determinism {
    /// Returns whether this determinism still qualifies a run for
    /// `ReproducibilityGrade::FullReproducible`.
    #[must_use]
    pub const fn allows_full_reproducibility(self) -> bool {
        matches!(self, Self::Deterministic | Self::Seeded)
    }
}

/// A registered plugin instance in the execution graph.
///
/// # Invariants
/// - Append-only per run; `node_id` is stable once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier, assigned at graph construction time.
    pub node_id: NodeId,
    /// Owning run.
    pub run_id: RunId,
    /// Structural role.
    pub node_type: NodeType,
    /// Plugin name (registry key).
    pub plugin_name: String,
    /// Plugin version string.
    pub plugin_version: String,
    /// Declared determinism.
    pub determinism: Determinism,
    /// Hash of the plugin's canonical configuration.
    pub config_hash: HashDigest,
    /// Optional position in the pipeline (source = 0, increasing downstream).
    pub position: Option<u32>,
    /// Declared input schema.
    pub input_schema: SchemaContract,
    /// Declared output schema.
    pub output_schema: SchemaContract,
}

// ============================================================================
// SECTION: Edge
// ============================================================================

/// How a routed token is handed to the destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// The token is consumed by this edge; it travels to exactly this destination.
    Move,
    /// The token remains available on the parent edge as well as this one.
    Copy,
}

/// A directed link between two nodes.
///
/// # Invariants
/// - `(from_node_id, label)` is unique on the outgoing side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Owning run.
    pub run_id: RunId,
    /// Source node.
    pub from_node_id: NodeId,
    /// Destination node.
    pub to_node_id: NodeId,
    /// Edge label ("continue" for the default path, otherwise a route name).
    pub label: String,
    /// Default routing mode for tokens traversing this edge.
    pub mode: EdgeMode,
}

// ============================================================================
// SECTION: Row
// ============================================================================

/// A record produced by a source.
///
/// # Invariants
/// - `(run_id, source_node_id, row_index)` uniquely identifies the row.
/// - `source_data_hash` is retained even after the payload is purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row identifier.
    pub row_id: RowId,
    /// Owning run.
    pub run_id: RunId,
    /// Source node that produced this row.
    pub source_node_id: NodeId,
    /// Zero-based index within the source's output stream.
    pub row_index: u64,
    /// SHA-256 of the row's canonical JSON.
    pub source_data_hash: HashDigest,
    /// Optional reference into the payload store (may be purged later).
    pub payload_ref: Option<HashDigest>,
}

// ============================================================================
// SECTION: Token
// ============================================================================

/// An instance of a row traveling along a specific DAG path.
///
/// # Invariants
/// - A child token's `row_id` always equals its parents' `row_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning run.
    pub run_id: RunId,
    /// The row this token carries.
    pub row_id: RowId,
    /// Sibling link created by a fork, if any.
    pub fork_group_id: Option<ForkGroupId>,
    /// Sibling link produced by a coalesce, if any.
    pub join_group_id: Option<JoinGroupId>,
    /// Sibling link created by a 1-to-N expansion, if any.
    pub expand_group_id: Option<ExpandGroupId>,
    /// Branch name, set when this token is one side of a fork/coalesce.
    pub branch_name: Option<String>,
    /// Step index within the pipeline at which this token was created.
    pub step_in_pipeline: u32,
}

/// A parentage link for a (possibly multi-parent) token.
///
/// # Invariants
/// - `ordinal` is stable and determines merge/fork arrival order in traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParent {
    /// The child token.
    pub child_token_id: TokenId,
    /// One of the child's parents.
    pub parent_token_id: TokenId,
    /// Zero-based ordinal among the child's parents.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Node State
// ============================================================================

/// The lifecycle status of a node-state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// The token has entered the node but processing has not finished.
    Open,
    /// Processing finished successfully.
    Completed,
    /// Processing finished with an error.
    Failed,
}

/// A record of a token visiting a node, with an attempt counter.
///
/// # Invariants
/// - `Completed` states have non-null `output_hash`, `duration_ms`, `completed_at`.
/// - `Failed` states have non-null `duration_ms`, `completed_at`.
/// - `Open` states have none of those three fields.
/// - A token's states are ordered by `(step_index, attempt)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// State identifier.
    pub state_id: StateId,
    /// Owning run.
    pub run_id: RunId,
    /// Token whose visit this records.
    pub token_id: TokenId,
    /// Node visited.
    pub node_id: NodeId,
    /// Zero-based step index in the token's path.
    pub step_index: u32,
    /// Attempt counter (0 for the first attempt, incrementing on retry).
    pub attempt: u32,
    /// Lifecycle status.
    pub status: NodeStateStatus,
    /// Hash of the row as it entered the node.
    pub input_hash: HashDigest,
    /// Hash of the row as it left the node; required when `status == Completed`.
    pub output_hash: Option<HashDigest>,
    /// Timestamp the state was opened.
    pub started_at: Timestamp,
    /// Timestamp the state reached a terminal status.
    pub completed_at: Option<Timestamp>,
    /// Wall-clock duration in milliseconds; required for `Completed`/`Failed`.
    pub duration_ms: Option<u64>,
    /// Structured error payload, present only for `Failed` states.
    pub error_json: Option<String>,
    /// Structured context captured at completion (e.g. a coalesce merge summary).
    pub context_after_json: Option<String>,
}

// ============================================================================
// SECTION: Routing Events
// ============================================================================

/// A decision record written at a node state that has fanout.
///
/// # Invariants
/// - Events sharing `routing_group_id` are ordered by `ordinal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEvent {
    /// Event identifier.
    pub event_id: RoutingEventId,
    /// The node state this routing decision was made at.
    pub state_id: StateId,
    /// The edge this decision routes to.
    pub edge_id: EdgeId,
    /// Group identifier shared by every event from the same fanout decision.
    pub routing_group_id: RoutingGroupId,
    /// Zero-based ordinal within the routing group.
    pub ordinal: u32,
    /// Routing mode applied for this destination.
    pub mode: EdgeMode,
    /// Hash of the reason/condition evaluation that produced this route.
    pub reason_hash: HashDigest,
}

// ============================================================================
// SECTION: Token Outcome
// ============================================================================

/// The terminal or intermediate disposition of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOutcomeKind {
    /// The token reached a sink successfully.
    Completed,
    /// The token was routed away from the default path (non-terminal use
    /// only when paired with a subsequent terminal outcome; recorded here
    /// for tokens whose journey ends immediately after being routed
    /// nowhere further, e.g. a gate `reject`).
    Routed,
    /// The token failed permanently.
    Failed,
    /// The token was consumed producing fork children.
    Forked,
    /// The token was consumed as part of a coalesce merge.
    Coalesced,
    /// The token was consumed producing expand children.
    Expanded,
    /// The token is held, awaiting a coalesce merge. Non-terminal.
    Buffered,
    /// The token was consumed into an aggregation batch. Non-terminal.
    ConsumedInBatch,
    /// The token's row failed schema validation or was otherwise
    /// quarantined and requires manual review.
    Quarantined,
}

impl TokenOutcomeKind {
    /// Returns whether this outcome kind is terminal.
    ///
    /// Only `Buffered` and `ConsumedInBatch` are non-terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Buffered | Self::ConsumedInBatch)
    }
}

/// A terminal or intermediate disposition record for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcome {
    /// The token this outcome describes.
    pub token_id: TokenId,
    /// Owning run.
    pub run_id: RunId,
    /// Outcome kind.
    pub kind: TokenOutcomeKind,
    /// Whether this outcome is terminal (mirrors `kind.is_terminal()`).
    pub is_terminal: bool,
    /// Timestamp the outcome was recorded.
    pub recorded_at: Timestamp,
    /// Structured detail (e.g. a failure reason), if any.
    pub detail_json: Option<String>,
}

// ============================================================================
// SECTION: Batch
// ============================================================================

/// Aggregation batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The batch is accumulating members.
    Draft,
    /// The batch is being processed by the aggregation plugin.
    Executing,
    /// The batch produced output successfully.
    Completed,
    /// The batch failed; may be retried under a new `batch_id`.
    Failed,
}

/// An aggregation grouping of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Owning run.
    pub run_id: RunId,
    /// Aggregation node this batch belongs to.
    pub aggregation_node_id: NodeId,
    /// Retry attempt counter.
    pub attempt: u32,
    /// Lifecycle status.
    pub status: BatchStatus,
}

/// Membership of a token in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMember {
    /// Owning batch.
    pub batch_id: BatchId,
    /// Member token.
    pub token_id: TokenId,
    /// Zero-based ordinal within the batch.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Call
// ============================================================================

/// The kind of external I/O a [`Call`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// A call to a large language model.
    Llm,
    /// An HTTP request.
    Http,
    /// A SQL query.
    Sql,
    /// A filesystem read or write.
    Filesystem,
}

/// The outcome of a [`Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// The call succeeded.
    Success,
    /// The call failed.
    Error,
}

/// An external I/O event under a node state (or a source/sink operation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Call identifier.
    pub call_id: CallId,
    /// Owning run.
    pub run_id: RunId,
    /// The node state this call was made under, if any (source/sink
    /// operations outside a node-state context leave this `None`).
    pub state_id: Option<StateId>,
    /// Call kind.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// Hash of the canonical request.
    pub request_hash: HashDigest,
    /// Payload-store reference for the request body, if a store is configured.
    pub request_payload_ref: Option<HashDigest>,
    /// Payload-store reference for the response body, if a store is configured.
    pub response_payload_ref: Option<HashDigest>,
    /// Observed latency in milliseconds.
    pub latency_ms: u64,
    /// Structured error payload, present only when `status == Error`.
    pub error_json: Option<String>,
    /// Timestamp the call was recorded.
    pub recorded_at: Timestamp,
}

// ============================================================================
// SECTION: Validation / Transform Errors
// ============================================================================

/// A row that failed schema validation at the source. Never gets a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// Record identifier.
    pub validation_error_id: ValidationErrorId,
    /// Owning run.
    pub run_id: RunId,
    /// Source node the row came from.
    pub source_node_id: NodeId,
    /// Hash of the row that failed validation.
    pub row_hash: HashDigest,
    /// The row's original data, persisted verbatim.
    pub row_data: RowData,
    /// Human/structured description of the failure.
    pub error_json: String,
    /// Timestamp recorded.
    pub recorded_at: Timestamp,
}

/// A row a transform rejected via an error result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformErrorRecord {
    /// Record identifier.
    pub transform_error_id: TransformErrorId,
    /// Owning run.
    pub run_id: RunId,
    /// Token the transform rejected.
    pub token_id: TokenId,
    /// Node the rejection happened at.
    pub node_id: NodeId,
    /// The row's original data, persisted verbatim.
    pub row_data: RowData,
    /// Structured rejection reason.
    pub error_json: String,
    /// Timestamp recorded.
    pub recorded_at: Timestamp,
}
