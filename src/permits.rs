//! Wait-free bounded permit accounting.
//!
//! The counter is the only shared mutable state the bulkhead owns. It
//! never blocks: acquisition is a CAS loop that fails fast when no permit
//! is available, and release re-checks the range invariant so that
//! accounting bugs surface at the releasing call site instead of
//! corrupting admission silently.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Bounded permit counter: `0 <= available <= limit` at all times.
///
/// Acquisition uses `Acquire` ordering and release uses `Release`, so a
/// released permit synchronizes with the next successful acquisition and
/// everything published before the release is visible to the admitted
/// submission.
#[derive(Debug)]
pub struct PermitCounter {
    available: AtomicU32,
    limit: u32,
}

impl PermitCounter {
    /// Creates a counter with all `limit` permits available.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self {
            available: AtomicU32::new(limit),
            limit,
        }
    }

    /// Returns the configured limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Attempts to take one permit without waiting.
    ///
    /// Returns whether the decrement happened. Wait-free: a failed CAS
    /// retries only while other acquirers make progress.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.load(Ordering::Acquire);
        loop {
            if available == 0 {
                return false;
            }
            match self.available.compare_exchange_weak(
                available,
                available - 1,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => available = actual,
            }
        }
    }

    /// Returns one permit to the counter.
    ///
    /// The increment is published before the range check runs, so a
    /// violation is observable to concurrent snapshots exactly as the
    /// releasing caller saw it.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the incremented value exceeds
    /// the limit. That means a permit was released that was never
    /// acquired; the counter is left poisoned on purpose.
    pub fn release(&self) -> Result<()> {
        let mut current = self.available.load(Ordering::Acquire);
        loop {
            let new = current + 1;
            match self.available.compare_exchange_weak(
                current,
                new,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if new > self.limit {
                        return Err(Error::invariant_violation(new, self.limit));
                    }
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Best-effort snapshot of the available permits.
    ///
    /// Not linearizable: the value may be stale by the time the caller
    /// looks at it. Never use it to predict admission.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the observed value is outside
    /// `[0, limit]`.
    pub fn available(&self) -> Result<u32> {
        let available = self.available.load(Ordering::Acquire);
        if available > self.limit {
            return Err(Error::invariant_violation(available, self.limit));
        }
        Ok(available)
    }
}
