//! Terminal outcome classification.
//!
//! Every admitted submission resolves to exactly one terminal kind, which
//! is what the listener observes at release time. Classification is a pure
//! function of the optional error: no error is success, the cancellation
//! marker (bare, or wrapped one level inside a completion wrapper) is
//! cancellation, anything else is failure.

use crate::error::{Error, ErrorKind};

/// Terminal outcome kinds reported to [`BulkheadListener::on_released`].
///
/// [`BulkheadListener::on_released`]: crate::listener::BulkheadListener::on_released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalKind {
    /// The operation completed successfully.
    Success,
    /// The operation completed exceptionally.
    Failure,
    /// The operation was cancelled.
    Cancelled,
}

impl TerminalKind {
    /// Returns a human-readable name for the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Classifies an optional terminal error into a [`TerminalKind`].
///
/// The completion-wrapper unwrap is bounded to a single level: a
/// cancellation nested two wrappers deep classifies as failure.
#[must_use]
pub fn classify_terminal(error: Option<&Error>) -> TerminalKind {
    match error {
        None => TerminalKind::Success,
        Some(e) if e.is_cancelled() => TerminalKind::Cancelled,
        Some(e) if e.kind() == ErrorKind::Completion => {
            if e.cause().is_some_and(Error::is_cancelled) {
                TerminalKind::Cancelled
            } else {
                TerminalKind::Failure
            }
        }
        Some(_) => TerminalKind::Failure,
    }
}
