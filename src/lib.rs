//! Async bulkhead: submission-based admission control for in-flight work.
//!
//! # Overview
//!
//! A bulkhead enforces a fixed upper bound on concurrently in-flight
//! asynchronous operations. An operation is in-flight from the moment a
//! submission is admitted (a permit is acquired) until the handle returned
//! by [`Bulkhead::submit`] reaches a terminal state: success, failure, or
//! cancellation.
//!
//! When the bulkhead is saturated, submissions are rejected immediately
//! and fail fast; rejected submissions never invoke the supplied factory.
//! There is no queuing, no waiting, and no timeout. Rejection is the only
//! overload behavior.
//!
//! # Core Guarantees
//!
//! - **Bounded in-flight count**: admissions never exceed the limit
//! - **Never blocks**: submission, cancellation, and introspection are
//!   wait-free with respect to callers
//! - **Exactly-once release**: every admitted submission releases its
//!   permit exactly once, across every race between stage completion,
//!   handle cancellation, and registration failure
//! - **Errors pass through unchanged**: the bulkhead never wraps or
//!   reinterprets an operation's failure
//! - **Cancellation is local**: cancelling the handle releases the permit
//!   and marks the handle cancelled; it never touches the user's work
//!
//! # Module Structure
//!
//! - [`bulkhead`]: the admission gate and release state machine
//! - [`handle`]: the future-like handle returned by `submit`
//! - [`stage`]: the observable-completion abstraction the factory produces
//! - [`permits`]: wait-free bounded permit accounting
//! - [`terminal`]: terminal outcome classification
//! - [`listener`]: best-effort observability hooks
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use async_bulkhead::{stage, Bulkhead};
//!
//! let bulkhead = Bulkhead::builder().name("downstream").limit(32).build();
//!
//! let handle = bulkhead.submit(|| {
//!     let (completer, completion) = stage::completion::<Response>();
//!     executor.spawn(async move {
//!         completer.complete(call_downstream().await);
//!     });
//!     Ok(completion)
//! });
//!
//! match handle.await {
//!     Ok(response) => handle_response(response),
//!     Err(e) if e.is_rejected() => shed_load(),
//!     Err(e) => report_failure(e),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod bulkhead;
pub mod error;
pub mod handle;
pub mod listener;
pub mod permits;
pub mod stage;
pub mod terminal;

// Re-exports for convenient access to the core types
pub use bulkhead::{Bulkhead, BulkheadBuilder};
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use handle::{HandleStatus, SubmissionHandle};
pub use listener::{BulkheadListener, NoopListener};
pub use permits::PermitCounter;
pub use stage::{completion, Completer, Completion, Stage, TerminalObserver};
pub use terminal::{classify_terminal, TerminalKind};
