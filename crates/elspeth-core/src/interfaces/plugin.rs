// crates/elspeth-core/src/interfaces/plugin.rs
// ============================================================================
// Module: Elspeth Plugin Contracts
// Description: Backend-agnostic traits for sources, transforms, gates, sinks,
// and aggregations.
// Purpose: Define the contract surfaces the orchestrator drives, independent
// of any concrete plugin implementation.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Plugin implementations (CSV/JSON/Excel sources, HTTP/LLM transforms, file
//! sinks) are out of scope for this crate; only their contracts live here.
//! Implementations must be deterministic given their declared
//! [`crate::core::model::Determinism`] and must fail closed on invalid
//! input — see `spec.md` §6 and §7.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::model::CallStatus;
use crate::core::model::CallType;
use crate::core::schema::SchemaContract;
use crate::core::time::Clock;
use crate::core::value::RowData;

// ============================================================================
// SECTION: Call Recording Seam
// ============================================================================

/// A single external I/O attempt a plugin wants recorded.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    /// Call kind.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// Raw request bytes (hashed and, if a payload store is configured,
    /// persisted by the recorder).
    pub request_bytes: Vec<u8>,
    /// Raw response bytes, if any.
    pub response_bytes: Option<Vec<u8>>,
    /// Observed latency in milliseconds.
    pub latency_ms: u64,
    /// Structured error payload, required when `status == Error`.
    pub error_json: Option<String>,
}

/// Errors raised recording a call.
#[derive(Debug, Error)]
pub enum CallSinkError {
    /// The underlying recorder rejected the call.
    #[error("call recording failed: {0}")]
    Recorder(String),
}

/// A seam plugins use to have external calls recorded without depending on
/// the Landscape recorder directly.
pub trait CallSink {
    /// Records a call attempt, returning the hash of the request that was
    /// recorded (useful for correlating with downstream errors).
    ///
    /// # Errors
    ///
    /// Returns [`CallSinkError`] when recording fails.
    fn record(&self, attempt: CallAttempt) -> Result<HashDigest, CallSinkError>;
}

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Context passed to every plugin method invocation.
pub struct PluginContext<'a> {
    /// The run this invocation belongs to.
    pub run_id: &'a RunId,
    /// The node this invocation belongs to.
    pub node_id: &'a NodeId,
    /// Clock used for any time-sensitive plugin logic.
    pub clock: &'a dyn Clock,
    /// Optional call-recording seam; `None` means calls are not recorded
    /// (e.g. during dry validation).
    pub calls: Option<&'a dyn CallSink>,
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Errors a source may raise while producing rows.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source failed to read its underlying data.
    #[error("source read failed: {0}")]
    Read(String),
    /// The source cannot resume from the given field resolution.
    #[error("source cannot resume: {0}")]
    ResumeUnsupported(String),
}

/// Resolution hints a resumed source uses to skip already-processed input
/// (e.g. "last row index processed").
#[derive(Debug, Clone, Default)]
pub struct FieldResolution {
    /// Arbitrary key/value resume hints, source-specific.
    pub fields: std::collections::BTreeMap<String, String>,
}

/// A bounded source of rows. Streaming is pull-based and always terminates
/// (the Non-goal "streaming unbounded sources" rules out a source that
/// never signals end-of-data).
pub trait Source {
    /// Returns the next row, or `Ok(None)` at end-of-source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the underlying read fails.
    fn next_row(&mut self, ctx: &PluginContext<'_>) -> Result<Option<RowData>, SourceError>;

    /// Returns this source's declared schema contract.
    fn schema_contract(&self) -> SchemaContract;

    /// Returns resume hints describing what has already been consumed.
    fn field_resolution(&self) -> FieldResolution {
        FieldResolution::default()
    }

    /// The default downstream edge label emitted rows travel on.
    fn on_success(&self) -> &str {
        "continue"
    }

    /// Whether this source can be reconfigured to resume a prior run.
    fn supports_resume(&self) -> bool {
        false
    }

    /// Reconfigures the source to resume from the given field resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ResumeUnsupported`] when resume is not supported.
    fn configure_for_resume(&mut self, _resolution: &FieldResolution) -> Result<(), SourceError> {
        Err(SourceError::ResumeUnsupported("resume not implemented".to_string()))
    }
}

// ============================================================================
// SECTION: Transform
// ============================================================================

/// Errors a transform may raise.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The transform's own processing failed in a way callers can retry.
    #[error("transform call failed (retryable): {0}")]
    Retryable(String),
    /// The transform's own processing failed permanently.
    #[error("transform call failed: {0}")]
    Permanent(String),
}

/// The status a transform reports for a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformStatus {
    /// The row was processed successfully; `success_reason` is advisory.
    Success {
        /// Advisory reason/label for the success path (e.g. which branch fired).
        success_reason: Option<String>,
    },
    /// The row was rejected; `reason` is recorded in `transform_errors`.
    Rejected {
        /// Structured rejection reason.
        reason: String,
    },
}

/// The result of processing one row through a (possibly 1-to-N) transform.
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// Processing status.
    pub status: TransformStatus,
    /// Output rows. Empty when `status` is `Rejected`.
    pub rows: Vec<RowData>,
}

impl TransformResult {
    /// Builds a single-row success result.
    #[must_use]
    pub fn success(row: RowData) -> Self {
        Self {
            status: TransformStatus::Success {
                success_reason: None,
            },
            rows: vec![row],
        }
    }

    /// Builds a rejection result.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: TransformStatus::Rejected {
                reason: reason.into(),
            },
            rows: Vec::new(),
        }
    }
}

/// A row-at-a-time transform.
pub trait Transform {
    /// Processes a single row.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the transform's own execution fails
    /// (as distinct from rejecting the row via `TransformStatus::Rejected`).
    fn process(
        &mut self,
        row: RowData,
        ctx: &PluginContext<'_>,
    ) -> Result<TransformResult, TransformError>;

    /// Returns this transform's declared input schema contract.
    fn input_schema(&self) -> SchemaContract;

    /// Returns this transform's declared output schema contract.
    fn output_schema(&self) -> SchemaContract;
}

// ============================================================================
// SECTION: Batch-Aware Transform
// ============================================================================

/// A single submitted row's settled result, released in submission order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// The submission index this result corresponds to.
    pub submission_index: u64,
    /// The processing outcome.
    pub outcome: Result<RowData, String>,
}

/// The output port a batch-aware transform emits settled results through.
pub trait OutputPort: Send {
    /// Emits one settled result. Called exactly once per accepted row.
    fn emit(&self, result: BatchResult);
}

/// A transform that pipelines many rows concurrently but preserves FIFO
/// output order. See `spec.md` §4.7.
pub trait BatchTransform: Send {
    /// Lifecycle hook called once before the first `accept`.
    fn on_start(&mut self, ctx: &PluginContext<'_>) {
        let _ = ctx;
    }

    /// Connects the output port and sets the FIFO-reorder buffer capacity.
    fn connect_output(&mut self, port: Box<dyn OutputPort>, max_pending: usize);

    /// Submits a row for asynchronous processing. Blocks (back-pressures)
    /// once `max_pending` in-flight rows are outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the row cannot be accepted at all
    /// (e.g. the worker pool has already been shut down).
    fn accept(&mut self, row: RowData, ctx: &PluginContext<'_>) -> Result<(), TransformError>;

    /// Waits for all in-flight rows to settle and emit.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Permanent`] if `timeout` elapses before
    /// the buffer drains — a timeout here indicates stalled workers.
    fn flush_batch_processing(&mut self, timeout: std::time::Duration) -> Result<(), TransformError>;

    /// Lifecycle hook called once after the last `flush_batch_processing`.
    fn close(&mut self) {}
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Errors a sink may raise.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink failed to write.
    #[error("sink write failed: {0}")]
    Write(String),
    /// The sink cannot resume in the configured mode.
    #[error("sink cannot resume: {0}")]
    ResumeUnsupported(String),
}

/// A reference to an artifact a sink produced (e.g. a file path or URI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Opaque URI or path identifying the written artifact.
    pub uri: String,
    /// Number of rows written in this call.
    pub rows_written: u64,
}

/// The result of validating a sink's output target before a resumed run
/// appends to it (e.g. checking an existing file's header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the existing output target is compatible with the declared schema.
    pub compatible: bool,
    /// Human-readable detail when `compatible` is `false`.
    pub detail: Option<String>,
}

/// A terminal consumer of rows.
pub trait Sink {
    /// Writes a batch of rows, returning a descriptor of what was written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the write fails.
    fn write(
        &mut self,
        rows: &[RowData],
        ctx: &PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, SinkError>;

    /// Flushes any buffered output.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the flush fails.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Closes the sink, releasing any held resources.
    fn close(&mut self) {}

    /// Whether this sink can be reconfigured to resume a prior run.
    fn supports_resume(&self) -> bool {
        false
    }

    /// Reconfigures the sink for append-mode resume.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::ResumeUnsupported`] when resume is not supported.
    fn configure_for_resume(&mut self) -> Result<(), SinkError> {
        Err(SinkError::ResumeUnsupported("resume not implemented".to_string()))
    }

    /// Validates that an existing output target is compatible with this
    /// sink's declared schema before resuming.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the target cannot be inspected at all.
    fn validate_output_target(&self) -> Result<ValidationResult, SinkError> {
        Ok(ValidationResult {
            compatible: true,
            detail: None,
        })
    }

    /// Supplies resume hints for sinks whose append logic depends on
    /// upstream field resolution (mirrors the source-side resolution map).
    fn set_resume_field_resolution(&mut self, _fields: &FieldResolution) {}
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// A routing decision returned by a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAction {
    /// Continue down the default edge.
    Continue,
    /// Move the token to exactly one of the named routes.
    RouteTo(Vec<String>),
    /// Fan the token out, `copy`-style, to every named route.
    ForkTo(Vec<String>),
    /// Reject the row outright (quarantined).
    Reject {
        /// Structured rejection reason.
        reason: String,
    },
}

/// Errors a gate condition may raise while evaluating.
#[derive(Debug, Error)]
pub enum GateError {
    /// Evaluating the condition over the row failed (missing field, type
    /// mismatch, or another runtime error). The row is quarantined.
    #[error("gate condition evaluation failed: {0}")]
    Evaluation(String),
}

/// Evaluates a condition expression over a row and returns a routing action.
pub trait Gate {
    /// Decides how to route `row`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when evaluation fails; the orchestrator
    /// quarantines the row rather than propagating the error further.
    fn decide(&self, row: &RowData, ctx: &PluginContext<'_>) -> Result<RoutingAction, GateError>;
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Errors an aggregation may raise.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Accepting or finalizing the batch failed.
    #[error("aggregation failed: {0}")]
    Failed(String),
}

/// Groups many rows into batches and emits fewer (or more) rows at finalize.
pub trait Aggregation {
    /// Accepts one row into the current batch.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the row cannot be accepted.
    fn accept(&mut self, row: RowData, ctx: &PluginContext<'_>) -> Result<(), AggregationError>;

    /// Finalizes the current batch, emitting its output rows.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when finalization fails.
    fn finalize(&mut self, ctx: &PluginContext<'_>) -> Result<Vec<RowData>, AggregationError>;
}
