//! # Rejection policy for work that cannot be enqueued.
//!
//! A submission is rejected when the loop is shutting down or when the slot
//! ring is full under a non-blocking claim (consumer-thread submissions never
//! block on their own ring). The policy decides whether the rejection is
//! raised to the caller as a [`SubmitError`](crate::SubmitError) or swallowed.
//!
//! Either way, a rejected `submit`/`schedule_*` settles its completion cell
//! with [`TaskError::Rejected`](crate::TaskError::Rejected) first — the cell
//! is the caller's error channel, and it never stays silently pending.

use tracing::debug;

use crate::error::RejectCause;

/// What kind of work was being enqueued when the rejection happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkKind {
    /// `execute` — fire-and-forget closure.
    Execute,
    /// `submit` — result-bearing closure.
    Submit,
    /// `schedule` / `schedule_fixed_*` / `time_shared`.
    Schedule,
    /// `post_event` — typed agent event.
    Event,
}

/// Policy verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectDisposition {
    /// Surface the rejection to the caller as an `Err`.
    Raise,
    /// Swallow it; the caller sees `Ok` (and, for result-bearing work, a cell
    /// already settled with the rejection failure).
    Swallow,
}

/// Pluggable handler invoked whenever a task cannot be enqueued.
pub trait RejectPolicy: Send + Sync + 'static {
    /// Decide the disposition for one rejected piece of work.
    fn rejected(&self, kind: WorkKind, cause: RejectCause) -> RejectDisposition;
}

/// Default policy: every rejection is raised to the caller.
#[derive(Debug, Default)]
pub struct AbortOnReject;

impl RejectPolicy for AbortOnReject {
    fn rejected(&self, _kind: WorkKind, _cause: RejectCause) -> RejectDisposition {
        RejectDisposition::Raise
    }
}

/// Drop rejected work quietly (logged at debug).
#[derive(Debug, Default)]
pub struct DiscardOnReject;

impl RejectPolicy for DiscardOnReject {
    fn rejected(&self, kind: WorkKind, cause: RejectCause) -> RejectDisposition {
        debug!(?kind, ?cause, "discarding rejected work");
        RejectDisposition::Swallow
    }
}
