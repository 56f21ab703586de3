// crates/elspeth-batch/src/lib.rs
// ============================================================================
// Crate: elspeth-batch
// Description: Worker-pool pipelining, FIFO reorder buffer, and AIMD retry
// controller for batch-aware transforms.
// Dependencies: elspeth-core, thiserror
// ============================================================================

//! ## Overview
//! `spec.md` §4.7 describes batch-aware transforms (the motivating callers
//! are LLM plugins and HTTP scrapers): a fixed-size worker pool pipelines
//! many rows concurrently while the output stream stays FIFO in submission
//! order. This crate assembles that behavior out of four independently
//! testable pieces:
//!
//! - [`aimd`]: per-endpoint-scope concurrency governance.
//! - [`reorder`]: the FIFO-reorder buffer.
//! - [`client_cache`]: per-row client objects that shrink to batch scope.
//! - [`query`]: the plugin-facing seam ([`query::RowQuery`]) a caller
//!   implements to describe its per-row work.
//!
//! [`adapter::BatchAdapter`] wires the four together behind
//! [`elspeth_core::BatchTransform`].

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod adapter;
pub mod aimd;
pub mod client_cache;
pub mod query;
pub mod reorder;

pub use adapter::BatchAdapter;
pub use query::QueryError;
pub use query::RowQuery;
