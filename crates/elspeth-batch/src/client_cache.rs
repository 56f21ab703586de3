// crates/elspeth-batch/src/client_cache.rs
// ============================================================================
// Module: Client Cache
// Description: Per-row client object cache that shrinks to batch scope once
// processing ends.
// Purpose: `spec.md` §4.7: "per-row client objects are released after each
// row completes; the adapter's internal cache must shrink to at most one
// entry (the batch scope) once processing ends, independent of success or
// failure."
// Dependencies: std::sync, std::collections::HashMap
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// Holds at most one client object per in-flight submission, plus an
/// optional long-lived entry shared across the whole batch.
pub struct ClientCache<C> {
    rows: Mutex<HashMap<u64, Arc<C>>>,
    batch_scope: Mutex<Option<Arc<C>>>,
}

impl<C> ClientCache<C> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()), batch_scope: Mutex::new(None) }
    }

    /// Returns the client for `submission_index`, creating it with `make`
    /// on first use.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn get_or_create(&self, submission_index: u64, make: impl FnOnce() -> C) -> Arc<C> {
        let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.entry(submission_index).or_insert_with(|| Arc::new(make())).clone()
    }

    /// Drops the per-row entry for `submission_index`. Called once a row
    /// has fully settled (success, permanent failure, or exhausted retry
    /// budget).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn remove(&self, submission_index: u64) {
        let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(&submission_index);
    }

    /// Establishes (or replaces) the one entry allowed to survive past the
    /// end of batch processing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set_batch_scope(&self, client: C) {
        let mut guard = self.batch_scope.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(Arc::new(client));
    }

    /// Drops every per-row entry, leaving at most the batch-scope entry.
    /// Called once `flush_batch_processing` has drained, regardless of
    /// outcome.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn shrink_to_batch_scope(&self) {
        let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.clear();
    }

    /// Total number of entries currently cached, including the batch-scope
    /// entry if set. Used by tests to assert the post-flush invariant.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        let rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let batch = self.batch_scope.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rows.len() + usize::from(batch.is_some())
    }

    /// `true` when no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]
    use super::ClientCache;

    #[test]
    fn per_row_entries_shrink_to_batch_scope_after_processing() {
        let cache: ClientCache<u32> = ClientCache::new();
        cache.get_or_create(0, || 10);
        cache.get_or_create(1, || 20);
        cache.set_batch_scope(99);
        assert_eq!(cache.len(), 3);
        cache.shrink_to_batch_scope();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_drops_only_the_named_row() {
        let cache: ClientCache<u32> = ClientCache::new();
        cache.get_or_create(0, || 10);
        cache.get_or_create(1, || 20);
        cache.remove(0);
        assert_eq!(cache.len(), 1);
    }
}
