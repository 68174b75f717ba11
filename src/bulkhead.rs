//! The admission gate and release state machine.
//!
//! A bulkhead bounds the number of concurrently in-flight operations. The
//! decision is made synchronously at submission time: either a permit is
//! acquired and the operation starts, or the submission fails fast with a
//! rejection and the operation factory is never invoked. There is no
//! queue, no waiting, no fairness, and no timeout; starvation under
//! sustained contention is acceptable by design.
//!
//! An admitted operation is in-flight from permit acquisition until the
//! first terminal transition of its handle: stage completion (success,
//! failure, or cancellation of the stage), caller cancellation of the
//! handle, or a failed observer registration. Whichever of those paths
//! wins the admission record's released-flag CAS performs exactly one
//! permit release and one listener dispatch; the losers do neither.
//!
//! # Example
//!
//! ```ignore
//! use async_bulkhead::{stage, Bulkhead};
//!
//! let bulkhead = Bulkhead::new(64);
//!
//! let handle = bulkhead.submit(|| {
//!     let (completer, completion) = stage::completion::<String>();
//!     // Start the work on whatever executor owns it; complete the
//!     // completer from there.
//!     spawn_query(completer);
//!     Ok(completion)
//! });
//!
//! match handle.await {
//!     Ok(rows) => println!("{rows}"),
//!     Err(e) if e.is_rejected() => println!("shed: {e}"),
//!     Err(e) => println!("failed: {e}"),
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handle::{Admission, HandleCore, SubmissionHandle};
use crate::listener::{self, BulkheadListener, NoopListener};
use crate::permits::PermitCounter;
use crate::stage::{Stage, TerminalObserver};
use crate::terminal::{classify_terminal, TerminalKind};

/// Submission-based async bulkhead.
///
/// Thread-safe for arbitrary concurrent submission, cancellation, and
/// introspection; no method ever blocks. Each instance owns its permit
/// counter and listener; there is no process-global state.
pub struct Bulkhead {
    name: String,
    permits: Arc<PermitCounter>,
    listener: Arc<dyn BulkheadListener>,
}

impl Bulkhead {
    /// Creates a bulkhead with the given concurrency limit and a no-op
    /// listener.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self::builder().limit(limit).build()
    }

    /// Creates a bulkhead with the given limit and listener.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    #[must_use]
    pub fn with_listener(limit: u32, listener: Arc<dyn BulkheadListener>) -> Self {
        Self::builder().limit(limit).listener(listener).build()
    }

    /// Returns a builder with default values.
    #[must_use]
    pub fn builder() -> BulkheadBuilder {
        BulkheadBuilder::new()
    }

    /// Returns the bulkhead name (used in log events and rejections).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured maximum number of in-flight operations.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.permits.limit()
    }

    /// Returns the number of permits currently available for admission.
    ///
    /// Instantaneous and advisory, not linearizable: the value may change
    /// immediately due to concurrent submissions or completions. Never
    /// use it to predict whether the next submission will be admitted.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if permit accounting is broken.
    pub fn available(&self) -> Result<u32> {
        self.permits.available()
    }

    /// Returns the number of operations currently in flight, derived as
    /// `limit - available`. The same advisory caveats apply.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if permit accounting is broken.
    pub fn in_flight(&self) -> Result<u32> {
        Ok(self.limit() - self.available()?)
    }

    /// Submits an operation to the bulkhead.
    ///
    /// The factory must be *cold*: it runs only after a permit has been
    /// acquired, exactly once, and never for a rejected submission. It
    /// produces the stage whose terminal completion governs the permit's
    /// lifetime.
    ///
    /// # Outcomes
    ///
    /// - **Rejected**: no permit was available. The returned handle is
    ///   already failed with a [`Rejected`](crate::ErrorKind::Rejected)
    ///   error and nothing else happened.
    /// - **Factory failure**: the factory returned `Err` or panicked. The
    ///   permit is released, the listener observes a failure, and the
    ///   handle carries the error.
    /// - **Admitted**: the returned handle settles when the stage reaches
    ///   a terminal state or the handle is cancelled, whichever comes
    ///   first; the permit is released exactly once either way.
    ///
    /// Cancelling the returned handle does not cancel the stage; see
    /// [`SubmissionHandle::cancel`].
    pub fn submit<T, S, F>(&self, factory: F) -> SubmissionHandle<T>
    where
        T: Send + 'static,
        S: Stage<T>,
        F: FnOnce() -> Result<S>,
    {
        if !self.permits.try_acquire() {
            tracing::debug!(bulkhead = %self.name, "submission rejected: saturated");
            listener::dispatch(|| self.listener.on_rejected());
            return SubmissionHandle::failed(Error::rejected(&self.name));
        }
        tracing::trace!(bulkhead = %self.name, "submission admitted");
        listener::dispatch(|| self.listener.on_admitted());

        let stage = match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(stage)) => stage,
            Ok(Err(error)) => return self.fail_admitted(error),
            Err(payload) => return self.fail_admitted(Error::panicked(payload.as_ref())),
        };

        let admission = Arc::new(Admission::new(
            Arc::clone(&self.permits),
            Arc::clone(&self.listener),
        ));
        let handle = SubmissionHandle::pending(Arc::clone(&admission));

        let observer: TerminalObserver<T> = {
            let core = handle.core();
            let admission = Arc::clone(&admission);
            let name = self.name.clone();
            Box::new(move |result| settle_terminal(&name, &core, &admission, result))
        };

        match catch_unwind(AssertUnwindSafe(move || stage.on_terminal(observer))) {
            Ok(Ok(())) => handle,
            Ok(Err(error)) => self.registration_failed(&admission, error),
            Err(payload) => {
                let error = Error::panicked(payload.as_ref());
                self.registration_failed(&admission, error)
            }
        }
    }

    /// Failure between admission and admission-record creation: the
    /// factory threw or refused. No other path can release here, so the
    /// permit goes straight back through the checked release.
    fn fail_admitted<T>(&self, error: Error) -> SubmissionHandle<T> {
        match self.permits.release() {
            Err(violation) => {
                tracing::debug!(bulkhead = %self.name, %violation, "permit release failed");
                SubmissionHandle::failed(violation)
            }
            Ok(()) => {
                tracing::trace!(bulkhead = %self.name, %error, "factory failed; permit released");
                listener::dispatch(|| {
                    self.listener.on_released(TerminalKind::Failure, Some(&error));
                });
                SubmissionHandle::failed(error)
            }
        }
    }

    /// Observer registration failed after the stage was produced. The
    /// observer may already have run inline before the failure, so the
    /// release goes through the shared CAS like every other path. The
    /// originally built handle is discarded; the caller gets a fresh
    /// handle carrying the registration error, or the violation if the
    /// checked release uncovered one (the listener is skipped then).
    fn registration_failed<T>(&self, admission: &Admission, error: Error) -> SubmissionHandle<T> {
        if admission.try_claim_release() {
            match admission.release_permit() {
                Err(violation) => {
                    tracing::debug!(bulkhead = %self.name, %violation, "permit release failed");
                    return SubmissionHandle::failed(violation);
                }
                Ok(()) => {
                    tracing::debug!(bulkhead = %self.name, %error, "observer registration failed");
                    listener::dispatch(|| {
                        self.listener.on_released(TerminalKind::Failure, Some(&error));
                    });
                }
            }
        }
        SubmissionHandle::failed(error)
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("limit", &self.permits.limit())
            .field("available", &self.permits.available().ok())
            .finish_non_exhaustive()
    }
}

/// Terminal-observer body: runs when the stage reaches a terminal state,
/// on whichever thread drove it there.
fn settle_terminal<T>(name: &str, core: &HandleCore<T>, admission: &Admission, result: Result<T>) {
    if admission.try_claim_release() {
        match admission.release_permit() {
            Err(violation) => {
                tracing::debug!(bulkhead = %name, %violation, "permit release failed");
                core.complete_failure(violation);
                return;
            }
            Ok(()) => {
                let kind = classify_terminal(result.as_ref().err());
                tracing::trace!(bulkhead = %name, kind = %kind, "permit released");
                let error = match kind {
                    TerminalKind::Failure => result.as_ref().err(),
                    TerminalKind::Success | TerminalKind::Cancelled => None,
                };
                listener::dispatch(|| admission.listener().on_released(kind, error));
            }
        }
    }
    // Propagate the stage terminal to the handle. Monotonic: a no-op if
    // cancellation already completed it.
    match result {
        Ok(value) => {
            core.complete_success(value);
        }
        Err(error) => {
            core.complete_failure(error);
        }
    }
}

/// Builder for [`Bulkhead`].
pub struct BulkheadBuilder {
    name: String,
    limit: u32,
    listener: Option<Arc<dyn BulkheadListener>>,
}

impl std::fmt::Debug for BulkheadBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadBuilder")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("listener", &self.listener.as_ref().map(|_| "<listener>"))
            .finish()
    }
}

impl BulkheadBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "default".into(),
            limit: 10,
            listener: None,
        }
    }

    /// Sets the bulkhead name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum number of in-flight operations.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn BulkheadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Builds the bulkhead.
    ///
    /// # Panics
    ///
    /// Panics if the configured limit is zero.
    #[must_use]
    pub fn build(self) -> Bulkhead {
        assert!(self.limit > 0, "bulkhead limit must be positive");
        Bulkhead {
            name: self.name,
            permits: Arc::new(PermitCounter::new(self.limit)),
            listener: self
                .listener
                .unwrap_or_else(|| Arc::new(NoopListener)),
        }
    }
}

impl Default for BulkheadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
