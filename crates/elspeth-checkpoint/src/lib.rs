// crates/elspeth-checkpoint/src/lib.rs
// ============================================================================
// Crate: elspeth-checkpoint
// Description: Cursor persistence and the resume driver's topology-validated
// recovery procedure.
// Dependencies: elspeth-core, elspeth-graph, elspeth-landscape, serde,
// serde_json, thiserror
// ============================================================================

//! ## Overview
//! `spec.md` §4.10: the checkpoint manager writes a cursor on one of three
//! triggers ([`elspeth_config::CheckpointTrigger`]); the resume driver loads
//! a persisted run, verifies its config and topology hash against the
//! current settings, and hands the orchestrator back a resume point plus the
//! reference [`resume::NullSource`] swap.
//!
//! - [`cursor`]: [`cursor::Cursor`] and its on-disk [`cursor::CursorStore`].
//! - [`manager`]: [`manager::CheckpointManager`], deciding *when* to persist.
//! - [`resume`]: [`resume::ResumeDriver`], the five-step recovery procedure.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod cursor;
pub mod manager;
pub mod resume;

pub use cursor::CheckpointError;
pub use cursor::Cursor;
pub use cursor::CursorStore;
pub use manager::CheckpointEvent;
pub use manager::CheckpointManager;
pub use resume::GracefulShutdownError;
pub use resume::NullSource;
pub use resume::ResumeDecision;
pub use resume::ResumeDriver;
