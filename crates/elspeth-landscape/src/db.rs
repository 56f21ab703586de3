// crates/elspeth-landscape/src/db.rs
// ============================================================================
// Module: Landscape Connection Manager
// Description: SQLite connection lifecycle, pragmas, and the writer mutex.
// Purpose: Give the recorder a single-writer database with read-only access
// for concurrent lineage/explain queries.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Elspeth is single-writer-per-run (`spec.md` §5): one [`Database`] owns a
//! writable connection guarded by a mutex, serializing every recorder call
//! into short transactions. [`Database::read_only_connection`] opens an
//! independent `SQLITE_OPEN_READ_ONLY` connection so lineage/explain queries
//! never contend with the writer.
//!
//! An optional JSONL change journal mirrors every insert for downstream
//! consumers outside the database; see [`ChangeJournal`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the Landscape connection manager and schema layer.
#[derive(Debug, Error)]
pub enum LandscapeError {
    /// Database I/O failure.
    #[error("landscape db io error: {0}")]
    Io(String),
    /// Underlying SQLite engine error.
    #[error("landscape db error: {0}")]
    Db(String),
    /// The on-disk schema version does not match what this build expects.
    #[error("landscape schema version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version stored in `schema_meta`.
        found: i64,
        /// Version this build requires.
        expected: i64,
    },
    /// A recorder-level invariant was violated.
    #[error("landscape integrity violation: {0}")]
    Integrity(String),
    /// A value supplied to the recorder did not parse as a valid enum member.
    #[error("landscape invalid enum value for {field}: {value}")]
    InvalidEnum {
        /// Column or field name.
        field: &'static str,
        /// The offending stored value.
        value: String,
    },
    /// The requested record was not found.
    #[error("landscape record not found: {0}")]
    NotFound(String),
}

impl LandscapeError {
    pub(crate) fn from_rusqlite(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

impl From<LandscapeError> for elspeth_core::EngineError {
    fn from(error: LandscapeError) -> Self {
        // Every Landscape failure means the audit trail itself cannot be
        // trusted to have recorded what happened, not a condition a
        // particular row can be quarantined away from.
        Self::AuditIntegrity(error.to_string())
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for opening a Landscape database.
#[derive(Debug, Clone)]
pub struct LandscapeConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Optional path for a plaintext JSONL change journal.
    pub change_journal_path: Option<PathBuf>,
}

impl LandscapeConfig {
    /// Builds a config pointing at `path` with Elspeth's default busy
    /// timeout and no change journal.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5_000,
            change_journal_path: None,
        }
    }

    /// Enables a JSONL change journal at `path`.
    #[must_use]
    pub fn with_change_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.change_journal_path = Some(path.into());
        self
    }
}

// ============================================================================
// SECTION: Change Journal
// ============================================================================

/// One line of the optional JSONL change journal.
#[derive(Debug, Serialize)]
pub struct ChangeRecord<'a> {
    /// Content hash of the inserted payload, if any.
    pub hash: Option<&'a str>,
    /// Table the insert landed in.
    pub table: &'a str,
    /// Primary key of the inserted row.
    pub row_id: &'a str,
    /// Payload store reference, if any.
    pub payload_ref: Option<&'a str>,
}

/// Append-only mirror of every recorder insert, for downstream consumers
/// that cannot read SQLite directly.
#[derive(Debug)]
pub struct ChangeJournal {
    file: Mutex<File>,
}

impl ChangeJournal {
    /// Opens (creating/truncating-append) the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Io`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, LandscapeError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| LandscapeError::Io(err.to_string()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one change record as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Io`] when serialization or the write fails.
    pub fn append(&self, record: &ChangeRecord<'_>) -> Result<(), LandscapeError> {
        let mut line =
            serde_json::to_string(record).map_err(|err| LandscapeError::Io(err.to_string()))?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(line.as_bytes()).map_err(|err| LandscapeError::Io(err.to_string()))
    }
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// Owns the writable connection and opens read-only connections on demand.
pub struct Database {
    path: PathBuf,
    busy_timeout_ms: u64,
    writer: Arc<Mutex<Connection>>,
    change_journal: Option<ChangeJournal>,
}

impl Database {
    /// Opens (creating if necessary) a Landscape database at `config.path`,
    /// applies durability pragmas, and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the database or change journal
    /// cannot be opened, or when the schema version is incompatible.
    pub fn open(config: &LandscapeConfig) -> Result<Self, LandscapeError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| LandscapeError::Io(err.to_string()))?;
            }
        }
        let mut connection = open_writable_connection(&config.path, config.busy_timeout_ms)?;
        crate::schema::initialize(&mut connection)?;
        let change_journal = config
            .change_journal_path
            .as_deref()
            .map(ChangeJournal::open)
            .transpose()?;
        Ok(Self {
            path: config.path.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
            writer: Arc::new(Mutex::new(connection)),
            change_journal,
        })
    }

    /// Locks and returns the single writable connection, serializing writers
    /// per `spec.md` §5.
    ///
    /// # Panics
    ///
    /// Never panics: a poisoned mutex is recovered via
    /// `PoisonError::into_inner`, matching the rest of this workspace's
    /// lock-recovery convention.
    pub fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Opens an independent read-only connection, for lineage/explain
    /// queries that must not contend with the writer.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Db`] when the connection cannot be opened.
    pub fn read_only_connection(&self) -> Result<Connection, LandscapeError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection =
            Connection::open_with_flags(&self.path, flags).map_err(LandscapeError::from_rusqlite)?;
        connection
            .busy_timeout(std::time::Duration::from_millis(self.busy_timeout_ms))
            .map_err(LandscapeError::from_rusqlite)?;
        Ok(connection)
    }

    /// Returns the change journal, if one is configured.
    #[must_use]
    pub fn change_journal(&self) -> Option<&ChangeJournal> {
        self.change_journal.as_ref()
    }
}

/// Opens the writable connection and applies WAL/synchronous/busy-timeout
/// pragmas.
fn open_writable_connection(path: &Path, busy_timeout_ms: u64) -> Result<Connection, LandscapeError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(path, flags).map_err(LandscapeError::from_rusqlite)?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(LandscapeError::from_rusqlite)?;
    connection
        .execute_batch("PRAGMA journal_mode = WAL;")
        .map_err(LandscapeError::from_rusqlite)?;
    connection
        .execute_batch("PRAGMA synchronous = NORMAL;")
        .map_err(LandscapeError::from_rusqlite)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))
        .map_err(LandscapeError::from_rusqlite)?;
    Ok(connection)
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
    fn open_creates_schema_and_read_only_connection_works() {
        let dir = tempfile::tempdir().unwrap();
        let config = LandscapeConfig::new(dir.path().join("landscape.db"));
        let db = Database::open(&config).unwrap();
        let reader = db.read_only_connection().unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reopening_existing_database_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = LandscapeConfig::new(dir.path().join("landscape.db"));
        {
            let _db = Database::open(&config).unwrap();
        }
        let _db = Database::open(&config).unwrap();
    }

    #[test]
    fn change_journal_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ChangeJournal::open(&dir.path().join("journal.jsonl")).unwrap();
        journal
            .append(&ChangeRecord {
                hash: Some("abc"),
                table: "rows_table",
                row_id: "row-1",
                payload_ref: None,
            })
            .unwrap();
        let contents = std::fs::read_to_string(dir.path().join("journal.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
