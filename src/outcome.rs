//! Per-feed run outcomes.
//!
//! Failures are contained per feed identifier: one feed hitting a fatal
//! error must not stop the others from being attempted. Each component
//! returns one [`RunOutcome`] per feed so the caller can summarize the run
//! and pick an exit status.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Everything processed.
    Success,
    /// The feed was processed but some inputs were skipped along the way.
    Partial { skipped: usize },
    /// Nothing was written for this feed.
    Fatal { reason: String },
}

impl RunOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunOutcome::Fatal { .. })
    }

    /// Collapses a skip count into `Success` or `Partial`.
    pub fn from_skipped(skipped: usize) -> Self {
        if skipped == 0 {
            RunOutcome::Success
        } else {
            RunOutcome::Partial { skipped }
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Partial { skipped } => write!(f, "partial ({skipped} skipped)"),
            RunOutcome::Fatal { reason } => write!(f, "fatal: {reason}"),
        }
    }
}

/// True when every feed in the run came back fatal, i.e. nothing at all was
/// accomplished and the process should exit non-zero.
pub fn all_fatal(outcomes: &[(u32, RunOutcome)]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(|(_, o)| o.is_fatal())
}
