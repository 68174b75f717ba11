//! The future-like handle returned by `submit`, and the per-submission
//! admission record that drives exactly-once permit release.
//!
//! The handle is a tagged union over {pending, success, failure,
//! cancelled} with interior synchronization. Terminal transitions are
//! monotonic: the first path to complete the handle wins and later events
//! change nothing. Crucially the handle's terminal state is driven by the
//! release state machine, not by the underlying stage directly, so a
//! caller can always tell cancelled-by-handle apart from a stage that
//! failed with a cancellation error.
//!
//! The admission record carries the *released* flag: a single CAS that is
//! the linearization point between the terminal observer, handle
//! cancellation, and the registration-failure path. Whichever path wins
//! the CAS performs the one permit release and the one listener dispatch.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, ErrorKind, Result};
use crate::listener::{self, BulkheadListener};
use crate::permits::PermitCounter;
use crate::terminal::TerminalKind;

/// Per-submission admission record.
///
/// Owns the released flag; shared between the returned handle and the
/// terminal observer registered on the stage.
pub(crate) struct Admission {
    released: AtomicBool,
    permits: Arc<PermitCounter>,
    listener: Arc<dyn BulkheadListener>,
}

impl Admission {
    pub(crate) fn new(permits: Arc<PermitCounter>, listener: Arc<dyn BulkheadListener>) -> Self {
        Self {
            released: AtomicBool::new(false),
            permits,
            listener,
        }
    }

    /// Claims the right to release the permit. At most one caller ever
    /// wins; everyone else must neither release nor dispatch.
    pub(crate) fn try_claim_release(&self) -> bool {
        self.released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the claimed permit to the counter.
    pub(crate) fn release_permit(&self) -> Result<()> {
        self.permits.release()
    }

    pub(crate) fn listener(&self) -> &Arc<dyn BulkheadListener> {
        &self.listener
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Observable state of a [`SubmissionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStatus {
    /// Not yet terminal.
    Pending,
    /// Completed with a value.
    Success,
    /// Completed with an error.
    Failure,
    /// Cancelled via [`SubmissionHandle::cancel`].
    Cancelled,
}

enum HandleState<T> {
    Pending,
    /// `None` once the value has been yielded to a poll.
    Success(Option<T>),
    Failure(Error),
    Cancelled,
}

struct HandleInner<T> {
    state: HandleState<T>,
    waker: Option<Waker>,
}

/// Shared completion surface of a handle, cloned into the terminal
/// observer so it can settle the handle from whichever thread drives the
/// stage's terminal event.
pub(crate) struct HandleCore<T> {
    inner: Arc<Mutex<HandleInner<T>>>,
}

impl<T> Clone for HandleCore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> HandleCore<T> {
    fn with_state(state: HandleState<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandleInner { state, waker: None })),
        }
    }

    fn transition(&self, state: HandleState<T>) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, HandleState::Pending) {
                return false;
            }
            inner.state = state;
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Moves the handle to success. No-op if already terminal.
    pub(crate) fn complete_success(&self, value: T) -> bool {
        self.transition(HandleState::Success(Some(value)))
    }

    /// Moves the handle to failure. No-op if already terminal.
    pub(crate) fn complete_failure(&self, error: Error) -> bool {
        self.transition(HandleState::Failure(error))
    }

    /// Moves the handle to cancelled. No-op if already terminal.
    pub(crate) fn complete_cancelled(&self) -> bool {
        self.transition(HandleState::Cancelled)
    }
}

/// The future-like object returned by [`Bulkhead::submit`].
///
/// Awaiting the handle yields the operation's value, or the original
/// error unchanged if the operation failed, or a cancellation error if
/// the handle was cancelled. [`status`](Self::status) distinguishes the
/// four states without consuming anything.
///
/// Dropping the handle neither cancels the submission nor releases the
/// permit; accounting is carried by the bulkhead's terminal observer.
///
/// [`Bulkhead::submit`]: crate::Bulkhead::submit
#[must_use = "the handle is the only way to observe the submitted operation"]
pub struct SubmissionHandle<T> {
    core: HandleCore<T>,
    admission: Option<Arc<Admission>>,
}

impl<T> SubmissionHandle<T> {
    /// A pending handle wired to an admission record.
    pub(crate) fn pending(admission: Arc<Admission>) -> Self {
        Self {
            core: HandleCore::with_state(HandleState::Pending),
            admission: Some(admission),
        }
    }

    /// A handle that is terminal at birth; permit accounting (if any)
    /// has already been settled by the caller.
    pub(crate) fn failed(error: Error) -> Self {
        Self {
            core: HandleCore::with_state(HandleState::Failure(error)),
            admission: None,
        }
    }

    pub(crate) fn core(&self) -> HandleCore<T> {
        self.core.clone()
    }

    /// Returns the current state of the handle.
    #[must_use]
    pub fn status(&self) -> HandleStatus {
        match self.core.inner.lock().state {
            HandleState::Pending => HandleStatus::Pending,
            HandleState::Success(_) => HandleStatus::Success,
            HandleState::Failure(_) => HandleStatus::Failure,
            HandleState::Cancelled => HandleStatus::Cancelled,
        }
    }

    /// Returns true once the handle has reached any terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status() != HandleStatus::Pending
    }

    /// Returns true iff the handle was cancelled via [`cancel`](Self::cancel).
    ///
    /// A stage that completed with a cancellation error does *not* make
    /// the handle cancelled; it completes the handle as a failure
    /// carrying that error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == HandleStatus::Cancelled
    }

    /// Attempts to cancel the handle.
    ///
    /// Cancellation is a local observation: it releases the permit if no
    /// other path has, marks the handle cancelled, and reports
    /// `Cancelled` to the listener. It never cancels, interrupts, or
    /// otherwise touches the underlying stage, and a cancelled handle
    /// stays cancelled even if the stage later completes.
    ///
    /// Returns true iff the handle is cancelled when the call returns.
    /// Returns false when the handle already completed, or when the
    /// permit release uncovered an accounting violation (the handle then
    /// carries the violation as a failure).
    pub fn cancel(&self) -> bool {
        if let Some(admission) = &self.admission {
            if admission.try_claim_release() {
                match admission.release_permit() {
                    Err(violation) => {
                        self.core.complete_failure(violation);
                        return false;
                    }
                    Ok(()) => {
                        listener::dispatch(|| {
                            admission.listener().on_released(TerminalKind::Cancelled, None);
                        });
                    }
                }
            }
        }
        self.core.complete_cancelled();
        self.is_cancelled()
    }
}

impl<T> Future for SubmissionHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.core.inner.lock();
        match &mut inner.state {
            HandleState::Pending => {}
            HandleState::Success(value) => {
                return match value.take() {
                    Some(value) => Poll::Ready(Ok(value)),
                    None => panic!("SubmissionHandle polled after yielding its value"),
                };
            }
            HandleState::Failure(error) => return Poll::Ready(Err(error.clone())),
            HandleState::Cancelled => {
                return Poll::Ready(Err(
                    Error::new(ErrorKind::Cancelled).with_message("handle cancelled")
                ));
            }
        }
        inner.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for SubmissionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
