// crates/elspeth-checkpoint/src/manager.rs
// ============================================================================
// Module: Checkpoint Manager
// Description: Decides when to persist a cursor, per one of three triggers.
// Purpose: `spec.md` §4.10: "writes a cursor on one of three triggers: after
// every row, after every batch, or at a fixed time interval."
// Dependencies: elspeth-core, elspeth-config, crate::cursor
// ============================================================================

//! ## Overview
//! [`CheckpointManager`] wraps a [`crate::cursor::CursorStore`] with the
//! trigger policy from [`elspeth_config::CheckpointTrigger`]. The
//! orchestrator calls [`CheckpointManager::on_row_completed`] or
//! [`CheckpointManager::on_batch_completed`] after each unit of work; the
//! manager persists a cursor only when its trigger says to, and always
//! persists on [`CheckpointManager::checkpoint_now`] (used for the
//! graceful-shutdown path, which must checkpoint unconditionally).

use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use elspeth_config::CheckpointTrigger;
use elspeth_core::Clock;

use crate::cursor::CheckpointError;
use crate::cursor::Cursor;
use crate::cursor::CursorStore;

/// The unit of work that just completed, driving
/// [`CheckpointManager::on_row_completed`] / `on_batch_completed`'s trigger
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointEvent {
    /// One row reached a terminal outcome.
    Row,
    /// One batch (coalesce merge or batch-aware transform flush) completed.
    Batch,
}

/// Decides when to persist a [`Cursor`], per `spec.md` §4.10's trigger
/// model.
pub struct CheckpointManager {
    store: CursorStore,
    trigger: CheckpointTrigger,
    clock: std::sync::Arc<dyn Clock>,
    last_checkpoint_at: Mutex<Option<elspeth_core::Timestamp>>,
    sequence: AtomicU64,
}

impl CheckpointManager {
    /// Creates a manager persisting through `store` under `trigger`.
    #[must_use]
    pub fn new(store: CursorStore, trigger: CheckpointTrigger, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { store, trigger, clock, last_checkpoint_at: Mutex::new(None), sequence: AtomicU64::new(0) }
    }

    /// Loads the last persisted cursor, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the cursor file exists but cannot be
    /// read or parsed.
    pub fn load_cursor(&self) -> Result<Option<Cursor>, CheckpointError> {
        self.store.load()
    }

    /// Notifies the manager that `event` just completed with `build_cursor`
    /// lazily producing the cursor to persist, so callers only pay the cost
    /// of assembling one when the trigger actually fires. Returns `true` if
    /// a cursor was written.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if persistence fails.
    pub fn notify(&self, event: CheckpointEvent, build_cursor: impl FnOnce() -> Cursor) -> Result<bool, CheckpointError> {
        if !self.should_checkpoint(event) {
            return Ok(false);
        }
        self.checkpoint_now(build_cursor())?;
        Ok(true)
    }

    /// Persists `cursor` unconditionally, bypassing the trigger policy. Used
    /// on the graceful-shutdown path, which must checkpoint regardless of
    /// how far the trigger's own window has progressed.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if persistence fails.
    pub fn checkpoint_now(&self, mut cursor: Cursor) -> Result<(), CheckpointError> {
        cursor.sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.store.persist(&cursor)?;
        let mut last = self.last_checkpoint_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Some(self.clock.now());
        Ok(())
    }

    fn should_checkpoint(&self, event: CheckpointEvent) -> bool {
        match self.trigger {
            CheckpointTrigger::EveryRow => event == CheckpointEvent::Row,
            CheckpointTrigger::EveryBatch => event == CheckpointEvent::Batch,
            CheckpointTrigger::Interval { interval_seconds } => {
                let last = self.last_checkpoint_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                match *last {
                    None => true,
                    Some(last_at) => {
                        let elapsed_ms = self.clock.now().saturating_millis_since(last_at);
                        elapsed_ms >= u64::from(interval_seconds) * 1000
                    }
                }
            }
        }
    }
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
    use std::sync::Arc;

    use elspeth_core::HashAlgorithm;
    use elspeth_core::HashDigest;
    use elspeth_core::MockClock;
    use elspeth_core::NodeId;
    use elspeth_core::RunId;
    use elspeth_core::TokenId;
    use elspeth_core::Timestamp;
    use time::OffsetDateTime;

    use super::*;

    fn epoch() -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::UNIX_EPOCH)
    }

    fn cursor() -> Cursor {
        Cursor {
            run_id: RunId::new("run-1"),
            config_hash: HashDigest::new(HashAlgorithm::Sha256, b"config"),
            topology_hash: HashDigest::new(HashAlgorithm::Sha256, b"topology"),
            token_id: TokenId::new("token-1"),
            node_id: NodeId::new("node-1"),
            step_index: 0,
            sequence_number: 0,
            aggregation_state: serde_json::json!({}),
        }
    }

    #[test]
    fn every_row_trigger_checkpoints_on_row_events_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(CursorStore::new(dir.path().join("cursor.json")), CheckpointTrigger::EveryRow, Arc::new(MockClock::new(epoch())));
        assert!(manager.notify(CheckpointEvent::Row, cursor).unwrap());
        assert!(!manager.notify(CheckpointEvent::Batch, cursor).unwrap());
    }

    #[test]
    fn interval_trigger_waits_for_elapsed_time() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(MockClock::new(epoch()));
        let manager = CheckpointManager::new(CursorStore::new(dir.path().join("cursor.json")), CheckpointTrigger::Interval { interval_seconds: 10 }, clock.clone());
        assert!(manager.notify(CheckpointEvent::Row, cursor).unwrap());
        assert!(!manager.notify(CheckpointEvent::Row, cursor).unwrap());
        clock.advance(11_000);
        assert!(manager.notify(CheckpointEvent::Row, cursor).unwrap());
    }

    #[test]
    fn checkpoint_now_bypasses_the_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(CursorStore::new(dir.path().join("cursor.json")), CheckpointTrigger::EveryBatch, Arc::new(MockClock::new(epoch())));
        manager.checkpoint_now(cursor()).unwrap();
        assert!(manager.load_cursor().unwrap().is_some());
    }
}
