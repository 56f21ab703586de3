// crates/elspeth-landscape/src/purge.rs
// ============================================================================
// Module: Purge Manager
// Description: Retention-driven deletion of payload-store blobs.
// Purpose: Reclaim storage for old runs without touching audit metadata.
// Dependencies: elspeth-core, elspeth-store, elspeth-landscape::db
// ============================================================================

//! ## Overview
//! The purge manager scans `rows_table`, `calls`, and `routing_events` for
//! payload references older than a retention window, collapses them to a
//! distinct hash set, and deletes each from the [`PayloadStore`] (`spec.md`
//! §4.13). The audit database is never touched: every hash stays exactly
//! where the recorder wrote it, so [`crate::lineage::explain_row`] can still
//! walk a purged row's full lineage, just with `payload_available = false`.
//! Deleting an already-missing hash is a success, not an error — purge can
//! be re-run safely after a partial failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::time::Timestamp;
use elspeth_core::HashAlgorithm;
use elspeth_core::HashDigest;
use elspeth_store::PayloadStore;
use elspeth_store::PayloadStoreError;
use rusqlite::Connection;
use rusqlite::params;
use std::collections::BTreeSet;

use crate::db::Database;
use crate::db::LandscapeError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while scanning for or deleting expired payloads.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    /// Underlying database error while scanning for payload references.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// The payload store refused a delete for a reason other than the blob
    /// already being absent.
    #[error("payload store error during purge: {0}")]
    Store(#[from] PayloadStoreError),
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of a purge sweep (or dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Distinct payload hashes found eligible for deletion.
    pub eligible: Vec<HashDigest>,
    /// Number of hashes actually deleted from the payload store. Zero on a
    /// dry run.
    pub deleted: u64,
    /// Number of hashes that were already absent from the payload store
    /// (a no-op delete, counted separately so repeated sweeps are visible).
    pub skipped: u64,
}

// ============================================================================
// SECTION: Purge Manager
// ============================================================================

/// Scans for and deletes payload-store blobs older than a retention window.
pub struct PurgeManager<'a> {
    db: &'a Database,
    payload_store: &'a dyn PayloadStore,
}

impl<'a> PurgeManager<'a> {
    /// Builds a purge manager over `db`'s audit schema and `payload_store`'s
    /// blobs.
    #[must_use]
    pub fn new(db: &'a Database, payload_store: &'a dyn PayloadStore) -> Self {
        Self { db, payload_store }
    }

    /// Finds every distinct payload hash referenced by a row, call, or
    /// routing-event record created before `cutoff`, without deleting
    /// anything. Supports dry-run previews and lets callers inspect what a
    /// real sweep would remove.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::Landscape`] when the scan queries fail.
    pub fn find_expired_payload_refs(&self, cutoff: Timestamp) -> Result<Vec<HashDigest>, PurgeError> {
        let conn = self.db.read_only_connection().map_err(PurgeError::Landscape)?;
        let mut hashes = BTreeSet::new();
        collect_row_payload_refs(&conn, cutoff, &mut hashes)?;
        collect_call_payload_refs(&conn, cutoff, &mut hashes)?;
        collect_routing_event_payload_refs(&conn, cutoff, &mut hashes)?;
        Ok(hashes.into_iter().map(|hex| HashDigest::from_hex(HashAlgorithm::Sha256, hex)).collect())
    }

    /// Deletes every payload-store blob referenced by a record older than
    /// `cutoff`. Audit metadata (the hashes themselves) is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::Landscape`] when the scan fails, or
    /// [`PurgeError::Store`] when a delete fails for a reason other than the
    /// blob already being absent.
    pub fn sweep(&self, cutoff: Timestamp) -> Result<PurgeReport, PurgeError> {
        let eligible = self.find_expired_payload_refs(cutoff)?;
        let mut report = PurgeReport {
            eligible: eligible.clone(),
            deleted: 0,
            skipped: 0,
        };
        for hash in &eligible {
            if self.payload_store.exists(hash) {
                self.payload_store.delete(hash)?;
                report.deleted += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }
}

// ============================================================================
// SECTION: Scan Helpers
// ============================================================================

fn collect_row_payload_refs(conn: &Connection, cutoff: Timestamp, out: &mut BTreeSet<String>) -> Result<(), PurgeError> {
    let mut statement = conn
        .prepare("SELECT payload_ref, created_at FROM rows_table WHERE payload_ref IS NOT NULL")
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    let rows = statement
        .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    for row in rows {
        let (payload_ref, created_at) = row.map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
        if parsed_before(&created_at, cutoff) {
            out.insert(payload_ref);
        }
    }
    Ok(())
}

fn collect_call_payload_refs(conn: &Connection, cutoff: Timestamp, out: &mut BTreeSet<String>) -> Result<(), PurgeError> {
    let mut statement = conn
        .prepare("SELECT request_payload_ref, response_payload_ref, recorded_at FROM calls")
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    let rows = statement
        .query_map(params![], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?))
        })
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    for row in rows {
        let (request_ref, response_ref, recorded_at) = row.map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
        if parsed_before(&recorded_at, cutoff) {
            if let Some(hash) = request_ref {
                out.insert(hash);
            }
            if let Some(hash) = response_ref {
                out.insert(hash);
            }
        }
    }
    Ok(())
}

fn collect_routing_event_payload_refs(conn: &Connection, cutoff: Timestamp, out: &mut BTreeSet<String>) -> Result<(), PurgeError> {
    let mut statement = conn
        .prepare("SELECT reason_hash, created_at FROM routing_events WHERE reason_hash IS NOT NULL")
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    let rows = statement
        .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
    for row in rows {
        let (reason_hash, created_at) = row.map_err(|err| PurgeError::Landscape(LandscapeError::from_rusqlite(err)))?;
        if parsed_before(&created_at, cutoff) {
            out.insert(reason_hash);
        }
    }
    Ok(())
}

fn parsed_before(rfc3339: &str, cutoff: Timestamp) -> bool {
    Timestamp::parse_rfc3339(rfc3339).is_ok_and(|value| value < cutoff)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
