// crates/elspeth-orchestrator/src/result.rs
// ============================================================================
// Module: Run Result
// Description: The value `Orchestrator::run` returns to its caller.
// Purpose: `spec.md` §6: "Run result: `{run_id, status, rows_processed,
// rows_succeeded, rows_failed}`." and the three exit codes (0 success, 1
// error, 3 graceful shutdown) a CLI wraps this in.
// Dependencies: elspeth-core
// ============================================================================

use elspeth_core::RunId;
use elspeth_core::RunStatus;

/// Whether the run finished, failed outright, or was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every row reached a terminal outcome and the run completed normally.
    Completed,
    /// A cooperative shutdown was observed; in-flight rows were finished,
    /// a cursor was written, and the run stopped short of the source's end.
    Interrupted,
}

impl RunOutcome {
    /// The [`RunStatus`] this outcome persists to the run record.
    #[must_use]
    pub const fn run_status(self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Interrupted => RunStatus::Interrupted,
        }
    }

    /// The process exit code `spec.md` §6 assigns this outcome (0 or 3; 1
    /// is reserved for an error propagated out of `Orchestrator::run`
    /// entirely rather than returned as a `RunOutcome`).
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Interrupted => 3,
        }
    }
}

/// The summary `spec.md` §6 names as every run's result, whatever its
/// outcome.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The run this result describes.
    pub run_id: RunId,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Total rows read from the source.
    pub rows_processed: u64,
    /// Rows whose token(s) reached a `completed` terminal outcome.
    pub rows_succeeded: u64,
    /// Rows whose token(s) reached a `failed` terminal outcome (including
    /// schema rejections, transform failures, and coalesce failures).
    pub rows_failed: u64,
}
