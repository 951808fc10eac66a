//! Last-writer-wins admission keyed on `lastUpdated`.
//!
//! A candidate replaces the authoritative document only when its stamp is
//! strictly greater. Equal stamps are not newer, so re-submitting the
//! current document is a no-op.

use super::StateDocument;

/// Outcome of comparing a candidate against the authoritative document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Not newer than what is stored. Not an error.
    Stale,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Decide whether `candidate` may replace `authoritative`.
/// With nothing stored yet, any candidate is admitted.
pub fn admit(candidate: &StateDocument, authoritative: Option<&StateDocument>) -> Admission {
    match authoritative {
        Some(current) if candidate.last_updated <= current.last_updated => Admission::Stale,
        _ => Admission::Accepted,
    }
}

/// Returns whichever of the two documents wins the admission rule.
pub fn resolve(candidate: StateDocument, authoritative: StateDocument) -> StateDocument {
    match admit(&candidate, Some(&authoritative)) {
        Admission::Accepted => candidate,
        Admission::Stale => authoritative,
    }
}

/// Stamp for a write that must be newer than `previous` even when the local
/// clock lags behind the clock that produced it.
pub fn next_stamp(previous: i64, now_millis: i64) -> i64 {
    now_millis.max(previous.saturating_add(1))
}
