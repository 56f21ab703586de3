// crates/elspeth-config/src/lib.rs
// ============================================================================
// Crate: elspeth-config
// Description: Typed, serde-driven TOML settings model for engine-level
// knobs (pool sizes, timeouts, checkpoint intervals, payload store paths).
// Dependencies: serde, toml, thiserror
// ============================================================================

//! ## Overview
//! Concrete plugin configuration (CSV column maps, HTTP endpoints, LLM
//! prompts) is out of scope; this crate covers only the settings the engine
//! itself needs to run a pipeline: batch-adapter pool sizing and retry
//! budgets, checkpoint trigger cadence, and where the payload store and
//! Landscape database live on disk. [`EngineSettings`] is read from TOML and
//! validated once, at load time, so the orchestrator never has to guard
//! against a zero pool size or a negative timeout deep in a hot loop.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised loading or validating [`EngineSettings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML document could not be parsed into [`EngineSettings`].
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    /// A parsed value failed a validation rule.
    #[error("invalid setting {field}: {detail}")]
    Invalid {
        /// Dotted path of the offending field, e.g. `batch.pool_size`.
        field: &'static str,
        /// Human-readable description of the violated constraint.
        detail: String,
    },
}

impl From<ConfigError> for elspeth_core::EngineError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

// ============================================================================
// SECTION: Batch Settings
// ============================================================================

/// Worker-pool sizing and retry budget for batch-aware transforms
/// (`spec.md` §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSettings {
    /// Number of worker threads processing submitted rows concurrently.
    pub pool_size: u32,
    /// Maximum number of rows held in flight before `accept` back-pressures.
    pub max_pending: u32,
    /// Ceiling on the AIMD controller's effective concurrency window.
    pub max_concurrency: u32,
    /// Total wall-clock budget, in seconds, a single row may spend retrying
    /// before it fails with `query_failed`.
    pub max_capacity_retry_seconds: u64,
}

impl BatchSettings {
    /// Returns [`Self::max_capacity_retry_seconds`] as a [`Duration`].
    #[must_use]
    pub const fn max_capacity_retry(&self) -> Duration {
        Duration::from_secs(self.max_capacity_retry_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid { field: "batch.pool_size", detail: "must be at least 1".to_string() });
        }
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid { field: "batch.max_pending", detail: "must be at least 1".to_string() });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid { field: "batch.max_concurrency", detail: "must be at least 1".to_string() });
        }
        Ok(())
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_pending: 64,
            max_concurrency: 16,
            max_capacity_retry_seconds: 60,
        }
    }
}

// ============================================================================
// SECTION: Checkpoint Settings
// ============================================================================

/// The trigger that causes [`elspeth_checkpoint`](../elspeth_checkpoint/index.html)'s
/// manager to persist a cursor, per `spec.md` §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CheckpointTrigger {
    /// Write a cursor after every row completes.
    EveryRow,
    /// Write a cursor after every batch completes.
    EveryBatch,
    /// Write a cursor at most once per `interval_seconds`.
    Interval {
        /// Minimum number of seconds between cursor writes.
        interval_seconds: u64,
    },
}

/// Checkpoint cadence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointSettings {
    /// Which trigger controls cursor persistence.
    pub trigger: CheckpointTrigger,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self { trigger: CheckpointTrigger::EveryRow }
    }
}

// ============================================================================
// SECTION: Payload Store Settings
// ============================================================================

/// Where content-addressed payloads live on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadStoreSettings {
    /// Root directory for the filesystem payload store. `None` disables
    /// payload persistence; only hashes are recorded.
    pub base_dir: Option<PathBuf>,
    /// Retention period, in seconds, before a payload becomes eligible for
    /// purge.
    pub retention_seconds: u64,
}

impl PayloadStoreSettings {
    /// Returns [`Self::retention_seconds`] as a [`Duration`].
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

impl Default for PayloadStoreSettings {
    fn default() -> Self {
        Self { base_dir: None, retention_seconds: 30 * 24 * 60 * 60 }
    }
}

// ============================================================================
// SECTION: Landscape Settings
// ============================================================================

/// Where the Landscape audit database lives and how its connection behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LandscapeSettings {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Busy-timeout, in milliseconds, applied to the writer connection.
    pub busy_timeout_ms: u32,
    /// Optional path to a plaintext JSONL change journal mirroring every
    /// insert.
    pub change_journal_path: Option<PathBuf>,
}

impl Default for LandscapeSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("elspeth.sqlite3"),
            busy_timeout_ms: 5_000,
            change_journal_path: None,
        }
    }
}

// ============================================================================
// SECTION: Engine Settings
// ============================================================================

/// The full set of engine-level knobs read from a settings file.
///
/// Concrete plugin configuration is never part of this type; each plugin
/// factory receives its own configuration as an opaque JSON value from the
/// plugin registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSettings {
    /// Batch-adapter worker pool and retry budget.
    pub batch: BatchSettings,
    /// Checkpoint cadence.
    pub checkpoint: CheckpointSettings,
    /// Payload store location and retention.
    pub payload_store: PayloadStoreSettings,
    /// Landscape database connection settings.
    pub landscape: LandscapeSettings,
}

impl EngineSettings {
    /// Parses `text` as TOML and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or
    /// [`ConfigError::Invalid`] when a parsed value violates a validation
    /// rule.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a TOML settings file from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when `path` cannot be read, or the
    /// errors [`Self::from_toml_str`] may return.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.batch.validate()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
