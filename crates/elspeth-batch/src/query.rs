// crates/elspeth-batch/src/query.rs
// ============================================================================
// Module: Row Query
// Description: The per-row work a batch-aware transform dispatches to its
// worker pool, and the retryable/non-retryable classification of its
// failures.
// Purpose: `spec.md` §4.7 describes LLM plugins and HTTP scrapers as the
// motivating callers; this crate stays plugin-agnostic and exposes the
// seam those callers implement.
// Dependencies: elspeth-core
// ============================================================================

use elspeth_core::RowData;

/// A single outbound call's failure, classified as retryable or permanent.
///
/// Implementations that issue more than one sub-query per row (the
/// "multi-query row" case in `spec.md` §4.7) must apply all-or-nothing
/// semantics themselves inside [`RowQuery::call`]: only return `Ok` once
/// every sub-query has succeeded, and return a single [`QueryError`] the
/// moment any sub-query fails permanently, with no partial row merged in.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// The endpoint is rate-limiting the caller.
    RateLimited,
    /// The endpoint returned a server error.
    ServerError {
        /// HTTP-style status code, when one is available.
        status: u16,
    },
    /// The call did not complete within its own deadline.
    Timeout,
    /// The underlying connection was reset mid-call.
    ConnectionReset,
    /// The request violated the endpoint's content policy.
    ContentPolicy(String),
    /// The request or response was structurally invalid.
    Malformed(String),
}

impl QueryError {
    /// `true` for failures the AIMD controller should retry: rate limits,
    /// 5xx responses, timeouts, and connection resets. `false` for content
    /// policy and malformed-request failures, which retrying cannot fix.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError { .. } | Self::Timeout | Self::ConnectionReset
        )
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::ServerError { status } => write!(f, "server error (status {status})"),
            Self::Timeout => write!(f, "timed out"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ContentPolicy(detail) => write!(f, "content policy violation: {detail}"),
            Self::Malformed(detail) => write!(f, "malformed request or response: {detail}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// The per-row work dispatched to the worker pool in
/// [`crate::adapter::BatchAdapter`].
///
/// `Client` is whatever per-row state the query needs (an HTTP client, a
/// prepared prompt template); the adapter caches one per in-flight row and
/// drops it as soon as the row settles.
pub trait RowQuery: Send + Sync {
    /// Per-row client object type.
    type Client: Send + Sync;

    /// Builds a fresh client for one row.
    fn make_client(&self) -> Self::Client;

    /// Executes the query for `row` using `client`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when the call fails; see
    /// [`QueryError::is_retryable`] for how the caller should react.
    fn call(&self, row: RowData, client: &Self::Client) -> Result<RowData, QueryError>;

    /// The endpoint scope this query's AIMD controller should be keyed by.
    /// Queries that share a scope share effective concurrency governance.
    fn endpoint_scope(&self) -> &str;
}
