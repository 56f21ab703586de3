// crates/elspeth-core/src/core/error.rs
// ============================================================================
// Module: Engine Error
// Description: The top-level error enum every Elspeth component's typed
// error ultimately converts into.
// Purpose: `spec.md` §7's error table names ten error kinds spanning every
// crate in the workspace; `EngineError` is the one type the orchestrator's
// caller sees. Two variants are fatal and must never be retried:
// `AuditIntegrity` (a recorder invariant was violated, meaning the audit
// trail is already wrong) and `CheckpointMismatch` (a resume's topology hash
// disagrees with the recorded one).
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! `elspeth-core` sits beneath every other crate in this workspace, so
//! `EngineError` cannot hold `elspeth-graph`'s `GraphError` or
//! `elspeth-landscape`'s `LandscapeError` directly without an upward
//! dependency. Instead each owning crate provides its own `impl
//! From<ItsError> for EngineError` (permitted under the orphan rule because
//! its own error type is the trait's covered type parameter), collapsing
//! its typed error into the matching variant here. `EngineError` is
//! therefore the one error vocabulary the orchestrator's caller needs to
//! match on, while every crate that produces a typed error keeps full
//! structure internally up until that conversion.

use crate::interfaces::plugin::TransformError;

/// The top-level error every Elspeth component's typed error converts into.
///
/// # Handling
///
/// [`Self::AuditIntegrity`] and [`Self::CheckpointMismatch`] are fatal: the
/// orchestrator never catches and retries them, it propagates them straight
/// to its caller. Every other variant names a condition the orchestrator
/// recorded and routed (a quarantined row, a failed outcome, a retry that
/// exhausted its budget) before continuing the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration failed to load or validate. Fails the run before it
    /// starts.
    #[error("configuration error: {0}")]
    Config(String),
    /// Graph construction or `Graph::validate` rejected the topology. Fails
    /// the run before it starts.
    #[error("graph validation error: {0}")]
    GraphValidation(String),
    /// A row failed its schema contract at a source or an edge boundary.
    /// The row is quarantined and a `validation_errors` row is written.
    #[error("schema validation error: {0}")]
    SchemaValidation(String),
    /// A transform call failed. Retryable failures are retried under AIMD
    /// governance; permanent failures mark the row failed and write a
    /// `transform_errors` row.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// A coalesce resolved to a typed failure reason (`incomplete_branches`,
    /// `quorum_not_met`, `late_arrival_after_merge`, ...).
    #[error("coalesce failure: {0}")]
    CoalesceFailure(String),
    /// A payload failed its content-hash check on retrieval.
    #[error("payload integrity error: {0}")]
    Integrity(String),
    /// Fatal. A recorder invariant was violated — for example a node state
    /// claiming `completed` without an `output_hash`. The audit trail is
    /// already wrong; the process must abort rather than continue writing
    /// to it.
    #[error("audit integrity violated: {0}")]
    AuditIntegrity(String),
    /// Fatal. A resume's computed topology hash disagreed with the one
    /// recorded against the checkpointed run.
    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),
    /// A SIGINT (or equivalent cooperative cancel) was observed mid-run.
    /// Not a failure: the orchestrator finishes in-flight rows, writes a
    /// cursor, and reports `interrupted`.
    #[error("graceful shutdown requested")]
    GracefulShutdown,
}

impl EngineError {
    /// `true` for [`Self::AuditIntegrity`] and [`Self::CheckpointMismatch`],
    /// the two variants that must never be caught and retried.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AuditIntegrity(_) | Self::CheckpointMismatch(_))
    }
}

/// Where a [`EngineError::SchemaValidation`] originated, for callers that
/// want to distinguish a source-entry rejection from an inter-node edge
/// rejection without widening the variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaValidationSource {
    /// The row failed the originating source's declared output schema.
    Source,
    /// The row failed a downstream node's declared input schema.
    Edge,
}

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
    fn only_audit_integrity_and_checkpoint_mismatch_are_fatal() {
        assert!(EngineError::AuditIntegrity("bad state".to_string()).is_fatal());
        assert!(EngineError::CheckpointMismatch("topology differs".to_string()).is_fatal());
        assert!(!EngineError::GracefulShutdown.is_fatal());
        assert!(!EngineError::CoalesceFailure("incomplete_branches".to_string()).is_fatal());
    }

    #[test]
    fn transform_error_converts_via_from() {
        let engine_error: EngineError = TransformError::Permanent("bad row".to_string()).into();
        assert!(matches!(engine_error, EngineError::Transform(TransformError::Permanent(_))));
    }
}
