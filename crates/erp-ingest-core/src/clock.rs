// crates/erp-ingest-core/src/clock.rs
// ============================================================================
// Module: Clock
// Description: Wall-clock abstraction for timestamp checks.
// Purpose: Keep time-dependent decisions deterministic under test.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Authentication windows, key expiry, and ledger reaping all read the current
//! time through [`Clock`] so tests can pin it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    /// Returns the current unix time in seconds.
    fn now_unix_seconds(&self) -> i64;
}

// ============================================================================
// SECTION: Implementations
// ============================================================================

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
    }
}

/// Manually driven clock for tests and tooling.
#[derive(Debug, Default)]
pub struct FixedClock {
    /// Current unix time in seconds.
    now: AtomicI64,
}

impl FixedClock {
    /// Creates a clock pinned at `now`.
    #[must_use]
    pub const fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advances the clock by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_unix_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
