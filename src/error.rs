//! Error types used by the event loop and by completion cells.
//!
//! This module defines two main error enums:
//!
//! - [`SubmitError`] — synchronous rejection raised to the submitting thread.
//! - [`TaskError`] — failure causes a [`CompletionCell`](crate::CompletionCell)
//!   can settle with.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for
//! logging/metrics. Cancellation is modeled as [`TaskError::Canceled`], a
//! stackless marker variant: cancelling is routine, not exceptional, so no
//! backtrace or message is captured for it.

use std::time::Duration;
use thiserror::Error;

/// Why a piece of work could not be enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectCause {
    /// The loop is shutting down (or already terminated).
    ShuttingDown,
    /// The slot ring is full and the caller may not block
    /// (non-blocking claims are mandatory on the consumer thread).
    RingFull,
}

/// # Errors raised synchronously to a submitting thread.
///
/// Produced when [`execute`](crate::EventLoop::execute) /
/// [`submit`](crate::EventLoop::submit) / the `schedule_*` family cannot hand
/// work to the consumer and the configured
/// [`RejectPolicy`](crate::RejectPolicy) decides to raise.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Submission raced or followed a shutdown request.
    #[error("event loop is shutting down; task rejected")]
    ShuttingDown,

    /// The slot ring was full under a non-blocking claim.
    #[error("slot ring full; non-blocking claim failed")]
    RingFull,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::ShuttingDown => "submit_shutting_down",
            SubmitError::RingFull => "submit_ring_full",
        }
    }

    pub(crate) fn from_cause(cause: RejectCause) -> Self {
        match cause {
            RejectCause::ShuttingDown => SubmitError::ShuttingDown,
            RejectCause::RingFull => SubmitError::RingFull,
        }
    }
}

/// # Failure causes carried by completion cells.
///
/// User task bodies never abort the consumer loop; their failures are
/// converted into one of these variants and settled into the cell the caller
/// was handed back. There is no global error channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task body panicked; the panic payload message is preserved.
    #[error("task panicked: {message}")]
    Panicked {
        /// Stringified panic payload.
        message: String,
    },

    /// A time-sharing task exhausted its budget before producing a result.
    #[error("time budget {budget:?} exhausted")]
    DeadlineExceeded {
        /// The budget that was exhausted.
        budget: Duration,
    },

    /// Stackless cancellation marker. Never logged as an error.
    #[error("canceled")]
    Canceled,

    /// The task was rejected before it ever ran (shutdown or capacity).
    #[error("rejected: {cause:?}")]
    Rejected {
        /// Why the submission was refused.
        cause: RejectCause,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ringloop::TaskError;
    ///
    /// assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::DeadlineExceeded { .. } => "task_deadline_exceeded",
            TaskError::Canceled => "task_canceled",
            TaskError::Rejected { .. } => "task_rejected",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Panicked { message } => format!("panic: {message}"),
            TaskError::DeadlineExceeded { budget } => format!("deadline: {budget:?}"),
            TaskError::Canceled => "canceled".to_string(),
            TaskError::Rejected { cause } => format!("rejected: {cause:?}"),
        }
    }

    /// `true` only for the designated cancellation marker, distinct from
    /// ordinary failure.
    ///
    /// # Example
    /// ```
    /// use ringloop::TaskError;
    ///
    /// assert!(TaskError::Canceled.is_cancellation());
    /// assert!(!TaskError::Panicked { message: "boom".into() }.is_cancellation());
    /// ```
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

/// Renders a caught panic payload into a loggable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
