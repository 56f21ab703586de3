// crates/elspeth-core/src/core/time.rs
// ============================================================================
// Module: Elspeth Time Model
// Description: Canonical timestamp representation and clock abstraction.
// Purpose: Provide deterministic, replayable time values and a testable clock seam.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every timestamp that lands in the audit trail goes through [`Timestamp`],
//! which serializes as RFC 3339 so hashes and exports are stable across
//! platforms. Components that need wall-clock time take a `&dyn Clock`
//! rather than calling `OffsetDateTime::now_utc()` directly, so tests can
//! substitute a [`MockClock`] — this is the "optional clock source" the
//! coalesce executor and checkpoint timers require.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used throughout the audit trail.
///
/// # Invariants
/// - Serializes as an RFC 3339 string with sub-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i128);

impl Timestamp {
    /// Creates a timestamp from an `OffsetDateTime`.
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        Self(value.unix_timestamp_nanos())
    }

    /// Returns the timestamp as an `OffsetDateTime`.
    #[must_use]
    pub fn to_offset(self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.0)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Formats the timestamp as RFC 3339, the form stored in exports.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.to_offset().format(&Rfc3339).unwrap_or_default()
    }

    /// Parses an RFC 3339 string back into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error when `value` is not valid RFC 3339.
    pub fn parse_rfc3339(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::from_offset)
    }

    /// Returns the whole-millisecond difference `self - other`, saturating at zero
    /// when `self` precedes `other`.
    #[must_use]
    pub fn saturating_millis_since(self, other: Self) -> u64 {
        let delta_nanos = self.0.saturating_sub(other.0);
        if delta_nanos <= 0 {
            0
        } else {
            u64::try_from(delta_nanos / 1_000_000).unwrap_or(u64::MAX)
        }
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// A source of wall-clock time, substitutable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// A clock backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::now_utc())
    }
}

/// A clock whose value is set explicitly by test code.
///
/// # Invariants
/// - `now()` never advances on its own; callers must call [`MockClock::set`]
///   or [`MockClock::advance`].
#[derive(Debug)]
pub struct MockClock {
    current: Mutex<Timestamp>,
}

impl MockClock {
    /// Creates a mock clock starting at the given timestamp.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Sets the clock to an explicit timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set(&self, value: Timestamp) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = value;
    }

    /// Advances the clock by the given number of milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn advance(&self, millis: i64) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let advanced = guard.0.saturating_add(i128::from(millis) * 1_000_000);
        *guard = Timestamp(advanced);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
