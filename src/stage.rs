//! Stages: future-like values whose terminal completion the bulkhead
//! observes without driving.
//!
//! A stage is *observed*, never polled or executed: the bulkhead registers
//! a terminal observer and whoever owns the work completes the stage from
//! any thread. This keeps the bulkhead free of executors, timers, and
//! cancellation propagation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      COMPLETION STAGE                            │
//! │                                                                  │
//! │   Completer                               Completion             │
//! │     │                                        │                   │
//! │     │── complete(v) ──┐                      │                   │
//! │     │── fail(e) ──────┼── first event wins ──├── observer(r)     │
//! │     │── cancel() ─────┘                      │                   │
//! │     │                                        │                   │
//! │   (last drop) ── StageClosed ────────────────┘                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use async_bulkhead::stage;
//!
//! let (completer, completion) = stage::completion::<u32>();
//!
//! // Hand `completion` to the bulkhead via the factory; complete the
//! // work from wherever it actually runs.
//! std::thread::spawn(move || {
//!     completer.complete(42);
//! });
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Callback invoked exactly once at a stage's terminal transition.
pub type TerminalObserver<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// A future-like value with observable terminal completion.
///
/// Implementations must invoke the observer exactly once, at the first
/// terminal event, on whichever thread drives that event. If the stage is
/// already terminal at registration time the observer runs inline.
///
/// Registration is fallible; an implementation that returns `Err` must
/// not have invoked the observer.
pub trait Stage<T>: Send {
    /// Registers the terminal observer for this stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the observer cannot be registered. The
    /// observer was not and will never be invoked in that case.
    fn on_terminal(self, observer: TerminalObserver<T>) -> Result<()>;
}

struct StageInner<T> {
    /// Registered observer, if any, waiting for the terminal event.
    observer: Option<TerminalObserver<T>>,
    /// Terminal result reached before an observer registered.
    result: Option<Result<T>>,
    /// The observer has consumed the terminal result.
    delivered: bool,
    /// Live `Completer` clones; the last drop closes the stage.
    completers: usize,
}

impl<T> StageInner<T> {
    const fn is_terminal(&self) -> bool {
        self.delivered || self.result.is_some()
    }
}

/// Creates a completion stage: a promise-style pair where the
/// [`Completer`] resolves the terminal state and the [`Completion`] is
/// handed to the bulkhead for observation.
#[must_use]
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let inner = Arc::new(Mutex::new(StageInner {
        observer: None,
        result: None,
        delivered: false,
        completers: 1,
    }));
    (
        Completer {
            inner: Arc::clone(&inner),
        },
        Completion { inner },
    )
}

/// Resolves the terminal state of a completion stage.
///
/// Cloneable; the first terminal event across all clones wins. Dropping
/// every clone before a terminal event fails the stage with
/// [`ErrorKind::StageClosed`](crate::ErrorKind::StageClosed), since a
/// dropped completer can never complete and would otherwise hold its
/// permit forever.
pub struct Completer<T> {
    inner: Arc<Mutex<StageInner<T>>>,
}

impl<T> Completer<T> {
    /// Completes the stage successfully.
    ///
    /// Returns whether this call was the terminal event.
    pub fn complete(&self, value: T) -> bool {
        self.terminate(Ok(value))
    }

    /// Completes the stage exceptionally with `error`.
    ///
    /// Returns whether this call was the terminal event.
    pub fn fail(&self, error: Error) -> bool {
        self.terminate(Err(error))
    }

    /// Completes the stage with the cancellation marker.
    ///
    /// Returns whether this call was the terminal event.
    pub fn cancel(&self) -> bool {
        self.terminate(Err(Error::cancelled()))
    }

    fn terminate(&self, result: Result<T>) -> bool {
        let deliver = {
            let mut inner = self.inner.lock();
            if inner.is_terminal() {
                return false;
            }
            match inner.observer.take() {
                Some(observer) => {
                    inner.delivered = true;
                    Some((observer, result))
                }
                None => {
                    inner.result = Some(result);
                    None
                }
            }
        };
        if let Some((observer, result)) = deliver {
            observer(result);
        }
        true
    }
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        self.inner.lock().completers += 1;
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let observer = {
            let mut inner = self.inner.lock();
            inner.completers -= 1;
            if inner.completers > 0 || inner.is_terminal() {
                return;
            }
            match inner.observer.take() {
                Some(observer) => {
                    inner.delivered = true;
                    Some(observer)
                }
                None => {
                    inner.result = Some(Err(Error::stage_closed()));
                    None
                }
            }
        };
        if let Some(observer) = observer {
            observer(Err(Error::stage_closed()));
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("terminal", &self.inner.lock().is_terminal())
            .finish_non_exhaustive()
    }
}

/// The observable half of a completion stage.
///
/// Supports exactly one observer registration; taking `self` by value
/// makes a second registration unrepresentable.
pub struct Completion<T> {
    inner: Arc<Mutex<StageInner<T>>>,
}

impl<T> Completion<T> {
    /// Returns whether the stage has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().is_terminal()
    }
}

impl<T: Send + 'static> Stage<T> for Completion<T> {
    fn on_terminal(self, observer: TerminalObserver<T>) -> Result<()> {
        let pending = {
            let mut inner = self.inner.lock();
            match inner.result.take() {
                Some(result) => {
                    inner.delivered = true;
                    Some(result)
                }
                None => {
                    inner.observer = Some(observer);
                    return Ok(());
                }
            }
        };
        if let Some(result) = pending {
            observer(result);
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("terminal", &self.inner.lock().is_terminal())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recording_observer<T: Send + 'static>(
        results: &Arc<Mutex<Vec<Result<T>>>>,
    ) -> TerminalObserver<T> {
        let results = Arc::clone(results);
        Box::new(move |result| results.lock().push(result))
    }

    #[test]
    fn observer_runs_on_later_completion() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        assert!(results.lock().is_empty());
        assert!(completer.complete(7));
        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 7);
    }

    #[test]
    fn observer_runs_inline_when_already_terminal() {
        let (completer, stage) = completion::<u32>();
        assert!(completer.complete(7));
        assert!(stage.is_terminal());

        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn first_terminal_event_wins() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        assert!(completer.complete(1));
        assert!(!completer.complete(2));
        assert!(!completer.fail(Error::user("late")));
        assert!(!completer.cancel());

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
    }

    #[test]
    fn fail_delivers_error_unchanged() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        assert!(completer.fail(Error::user("boom")));
        let results = results.lock();
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.message(), Some("boom"));
    }

    #[test]
    fn cancel_delivers_cancellation_marker() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        assert!(completer.cancel());
        let results = results.lock();
        assert!(results[0].as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn dropping_last_completer_closes_stage() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        drop(completer);
        let results = results.lock();
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            crate::ErrorKind::StageClosed
        );
    }

    #[test]
    fn cloned_completer_keeps_stage_open() {
        let (completer, stage) = completion::<u32>();
        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();

        let clone = completer.clone();
        drop(completer);
        assert!(results.lock().is_empty());

        assert!(clone.complete(9));
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn drop_after_terminal_does_not_close() {
        let (completer, stage) = completion::<u32>();
        assert!(completer.complete(1));
        drop(completer);

        let results = Arc::new(Mutex::new(Vec::new()));
        stage.on_terminal(recording_observer(&results)).unwrap();
        let results = results.lock();
        assert!(results[0].is_ok());
    }

    #[test]
    fn completion_from_another_thread() {
        let (completer, stage) = completion::<u32>();
        let count = Arc::new(AtomicU32::new(0));
        {
            let count = Arc::clone(&count);
            stage
                .on_terminal(Box::new(move |result| {
                    assert_eq!(result.unwrap(), 42);
                    count.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        let t = std::thread::spawn(move || completer.complete(42));
        assert!(t.join().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
