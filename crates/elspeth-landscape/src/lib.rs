// crates/elspeth-landscape/src/lib.rs
// ============================================================================
// Crate: elspeth-landscape
// Description: The append-only audit trail: schema, connection management,
// the typed recorder, token identity rules, purge, and read-side lineage.
// Dependencies: elspeth-core, elspeth-store, rusqlite, rand, serde, thiserror
// ============================================================================

//! ## Overview
//! `elspeth-landscape` owns the "Landscape" (`spec.md` §4.3-§4.4, §4.6,
//! §4.12-§4.13): the relational audit schema and the single writer that
//! populates it, the token-identity bookkeeping fork/coalesce/expand depend
//! on, retention-driven payload purge, and the read-only lineage queries that
//! answer "what happened to this row" without touching the writer.
//!
//! [`db`] owns connection lifecycle and pragmas. [`schema`] owns DDL.
//! [`recorder`] is the only code path permitted to write through the schema.
//! [`token_manager`] wraps the recorder with the row/token-shaped API the
//! orchestrator actually uses. [`purge`] deletes payload-store blobs whose
//! retention window has elapsed while leaving every hash in place. [`lineage`]
//! answers explain queries against a read-only connection. [`ids`] generates
//! the opaque identifiers every table's primary key is drawn from.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod db;
pub mod ids;
pub mod lineage;
pub mod purge;
pub mod recorder;
pub mod schema;
pub mod token_manager;

pub use db::ChangeJournal;
pub use db::ChangeRecord;
pub use db::Database;
pub use db::LandscapeConfig;
pub use db::LandscapeError;
pub use ids::new_id;
pub use lineage::CallView;
pub use lineage::LineageError;
pub use lineage::RoutingGroupView;
pub use lineage::RowLineage;
pub use lineage::SourceRowView;
pub use lineage::explain_row;
pub use lineage::explain_token;
pub use purge::PurgeError;
pub use purge::PurgeManager;
pub use purge::PurgeReport;
pub use recorder::NodeStateCompletion;
pub use recorder::Recorder;
pub use recorder::RoutingEventInput;
pub use schema::SCHEMA_VERSION;
pub use token_manager::TokenInfo;
pub use token_manager::TokenManager;
