//! Error types and error handling strategy for the bulkhead.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Operation failures pass through the bulkhead unchanged; the bulkhead
//!   never wraps or reinterprets an error produced by user work
//! - Rejection is a normal control signal, not an operation failure
//! - Invariant violations are a distinct kind: they indicate a bug in
//!   permit accounting, never a misbehaving operation
//!
//! # Recovery Classification
//!
//! All errors can be classified by [`Recoverability`]:
//! - `Transient`: Temporary failure, safe to retry
//! - `Permanent`: Unrecoverable, do not retry
//! - `Unknown`: Recoverability depends on context

use core::fmt;
use std::sync::Arc;

/// Convenient result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Submission rejected: no permit was available.
    Rejected,
    /// The operation was cancelled. This is the cancellation marker the
    /// terminal classifier recognizes.
    Cancelled,
    /// Completion-wrapper error; the wrapped cause is in the source chain.
    Completion,
    /// The completer side of a stage was dropped before reaching a
    /// terminal state.
    StageClosed,
    /// The operation factory (or an observer registration) panicked.
    Panicked,
    /// Permit accounting observed a value outside `[0, limit]`.
    InvariantViolation,
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected => ErrorCategory::Admission,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Completion | Self::StageClosed | Self::Panicked | Self::User => {
                ErrorCategory::Operation
            }
            Self::InvariantViolation => ErrorCategory::Internal,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// This helps callers decide whether a retry can ever succeed.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            // Saturation clears as in-flight operations complete.
            Self::Rejected => Recoverability::Transient,
            // Cancellation and accounting bugs do not heal on retry.
            Self::Cancelled | Self::StageClosed | Self::InvariantViolation => {
                Recoverability::Permanent
            }
            Self::Completion | Self::Panicked | Self::User => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

/// Coarse grouping of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Admission control decisions (rejection).
    Admission,
    /// Cancellation signals.
    Cancellation,
    /// Failures originating in user-supplied work.
    Operation,
    /// Bulkhead bugs and invalid states.
    Internal,
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

/// The main error type for bulkhead operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is the cancellation marker.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a saturation rejection.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.kind, ErrorKind::Rejected)
    }

    /// Returns true if this error reports broken permit accounting.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::InvariantViolation)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the direct cause when it is itself a bulkhead [`Error`].
    ///
    /// This is the single-level unwrap used by terminal classification;
    /// deeper chains are not traversed.
    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<Error>())
    }

    /// Creates a saturation rejection for the named bulkhead.
    #[must_use]
    pub fn rejected(bulkhead: &str) -> Self {
        Self::new(ErrorKind::Rejected).with_message(format!("bulkhead '{bulkhead}' saturated"))
    }

    /// Creates the cancellation marker.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled).with_message("operation cancelled")
    }

    /// Creates a completion wrapper around `cause`.
    #[must_use]
    pub fn completion(cause: Self) -> Self {
        Self::new(ErrorKind::Completion)
            .with_message("operation completed exceptionally")
            .with_source(cause)
    }

    /// Creates a stage-closed error (completer dropped without a terminal).
    #[must_use]
    pub fn stage_closed() -> Self {
        Self::new(ErrorKind::StageClosed)
            .with_message("stage dropped before reaching a terminal state")
    }

    /// Creates an invariant violation for an out-of-range permit count.
    #[must_use]
    pub fn invariant_violation(available: u32, limit: u32) -> Self {
        Self::new(ErrorKind::InvariantViolation).with_message(format!(
            "bulkhead invariant violated: available permits={available} (limit={limit})"
        ))
    }

    /// Creates an error from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic payload of unknown type".to_string());
        Self::new(ErrorKind::Panicked).with_message(format!("panic: {message}"))
    }

    /// Creates a user-level error with the given message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{msg}"),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_preserved() {
        let err = Error::rejected("db");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(err.is_rejected());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn display_uses_message() {
        let err = Error::rejected("db");
        assert_eq!(err.to_string(), "bulkhead 'db' saturated");
    }

    #[test]
    fn display_falls_back_to_kind() {
        let err = Error::new(ErrorKind::Cancelled);
        assert_eq!(err.to_string(), "Cancelled");
    }

    #[test]
    fn completion_wraps_cause() {
        let err = Error::completion(Error::cancelled());
        assert_eq!(err.kind(), ErrorKind::Completion);
        let cause = err.cause().expect("cause");
        assert!(cause.is_cancelled());
    }

    #[test]
    fn cause_is_single_level() {
        let inner = Error::completion(Error::cancelled());
        let outer = Error::completion(inner);
        let cause = outer.cause().expect("cause");
        assert_eq!(cause.kind(), ErrorKind::Completion);
        assert!(!cause.is_cancelled());
    }

    #[test]
    fn source_chain_is_reachable() {
        use std::error::Error as _;
        let err = Error::completion(Error::user("boom"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorKind::Rejected.category(), ErrorCategory::Admission);
        assert_eq!(ErrorKind::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(ErrorKind::User.category(), ErrorCategory::Operation);
        assert_eq!(
            ErrorKind::InvariantViolation.category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn rejection_is_retryable() {
        assert!(ErrorKind::Rejected.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::InvariantViolation.is_retryable());
    }

    #[test]
    fn panic_payload_str_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("kaboom");
        let err = Error::panicked(payload.as_ref());
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.message(), Some("panic: kaboom"));
    }

    #[test]
    fn panic_payload_string_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        let err = Error::panicked(payload.as_ref());
        assert_eq!(err.message(), Some("panic: kaboom"));
    }

    #[test]
    fn invariant_violation_reports_counts() {
        let err = Error::invariant_violation(3, 2);
        assert!(err.is_invariant_violation());
        assert_eq!(
            err.to_string(),
            "bulkhead invariant violated: available permits=3 (limit=2)"
        );
    }
}
