// crates/elspeth-batch/src/aimd.rs
// ============================================================================
// Module: AIMD Controller
// Description: Additive-increase/multiplicative-decrease concurrency control
// for a per-endpoint scope, per `spec.md` §4.7.
// Purpose: Retryable call failures (rate limit, 5xx, timeout, connection
// reset) should shrink effective concurrency fast and let it recover slowly,
// rather than hammering a struggling endpoint at a fixed rate.
// Dependencies: std::sync, std::time
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Tracks the effective concurrency window for one endpoint scope.
///
/// Every success nudges the window up by one, capped at `max`. Every
/// retryable failure halves it, floored at one. Callers read
/// [`Self::backoff_delay`] to decide how long to sleep before retrying.
#[derive(Debug)]
pub struct AimdController {
    state: Mutex<u32>,
    min: u32,
    max: u32,
}

impl AimdController {
    /// Creates a controller starting at `initial` concurrency, bounded to
    /// `[1, max]`.
    #[must_use]
    pub fn new(initial: u32, max: u32) -> Self {
        let max = max.max(1);
        let initial = initial.clamp(1, max);
        Self { state: Mutex::new(initial), min: 1, max }
    }

    /// Current effective concurrency window.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.state.lock().map_or(self.min, |guard| *guard)
    }

    /// Additive increase by one, capped at `max`.
    pub fn on_success(&self) {
        let Ok(mut guard) = self.state.lock() else { return };
        *guard = (*guard + 1).min(self.max);
    }

    /// Multiplicative decrease by half, floored at `min`.
    pub fn on_retryable_failure(&self) {
        let Ok(mut guard) = self.state.lock() else { return };
        *guard = (*guard / 2).max(self.min);
    }

    /// Backoff delay before the next retry, inversely proportional to the
    /// current concurrency window: a controller that has backed off to one
    /// waits longest.
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        let window = self.current();
        let factor = self.max.saturating_sub(window).saturating_add(1);
        Duration::from_millis(u64::from(factor) * 50)
    }
}

/// Lazily creates and shares one [`AimdController`] per named endpoint
/// scope, matching `spec.md` §4.7's "per-endpoint scope" concurrency
/// governance.
#[derive(Debug, Default)]
pub struct AimdRegistry {
    scopes: Mutex<HashMap<String, std::sync::Arc<AimdController>>>,
    initial: u32,
    max: u32,
}

impl AimdRegistry {
    /// Creates a registry whose controllers all start at `initial`,
    /// capped at `max`.
    #[must_use]
    pub fn new(initial: u32, max: u32) -> Self {
        Self { scopes: Mutex::new(HashMap::new()), initial, max }
    }

    /// Returns the controller for `scope`, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry mutex is poisoned.
    #[must_use]
    pub fn scope(&self, scope: &str) -> std::sync::Arc<AimdController> {
        let mut guard = self.scopes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entry(scope.to_string())
            .or_insert_with(|| std::sync::Arc::new(AimdController::new(self.initial, self.max)))
            .clone()
    }
}
