//! Observability hooks for the bulkhead.
//!
//! Listeners are strictly best-effort and must not affect bulkhead
//! semantics. Implementations must be fast, non-blocking, and tolerant of
//! being invoked concurrently from arbitrary threads; no cross-submission
//! ordering is guaranteed.
//!
//! # Panic containment
//!
//! Every callback runs through [`dispatch`], which catches and discards
//! panics. A panicking listener cannot change admission, rejection, permit
//! accounting, or the terminal state of any handle.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::Error;
use crate::terminal::TerminalKind;

/// Observability hooks invoked by a [`Bulkhead`](crate::Bulkhead).
///
/// All methods default to no-ops, so implementations override only what
/// they record.
pub trait BulkheadListener: Send + Sync {
    /// Called when a submission is rejected due to saturation.
    ///
    /// The rejected operation factory was not invoked and no user work
    /// was started.
    fn on_rejected(&self) {}

    /// Called after a permit is acquired and before the factory runs.
    fn on_admitted(&self) {}

    /// Called at most once per admitted submission when the bulkhead
    /// releases its permit.
    ///
    /// `error` is `Some` iff `kind == TerminalKind::Failure`.
    fn on_released(&self, kind: TerminalKind, error: Option<&Error>) {
        let _ = kind;
        let _ = error;
    }
}

/// The default listener: ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl BulkheadListener for NoopListener {}

/// Runs a listener callback, swallowing any panic it raises.
pub(crate) fn dispatch(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("bulkhead listener panicked; panic swallowed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingListener {
        admitted: AtomicU32,
        rejected: AtomicU32,
        released: AtomicU32,
    }

    impl CountingListener {
        fn new() -> Self {
            Self {
                admitted: AtomicU32::new(0),
                rejected: AtomicU32::new(0),
                released: AtomicU32::new(0),
            }
        }
    }

    impl BulkheadListener for CountingListener {
        fn on_admitted(&self) {
            self.admitted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_rejected(&self) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_released(&self, _kind: TerminalKind, _error: Option<&Error>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_listener_accepts_all_events() {
        let listener = NoopListener;
        listener.on_admitted();
        listener.on_rejected();
        listener.on_released(TerminalKind::Success, None);
        listener.on_released(TerminalKind::Failure, Some(&Error::user("boom")));
    }

    #[test]
    fn dispatch_invokes_callback() {
        let listener = CountingListener::new();
        dispatch(|| listener.on_admitted());
        assert_eq!(listener.admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_swallows_panics() {
        let ran = AtomicU32::new(0);
        dispatch(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            panic!("listener bug");
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        // A later dispatch still runs.
        dispatch(|| {
            ran.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
