//! Core value types shared by every primitive in the crate.
//!
//! - [`TaskId`]: identity of a scheduled unit of work
//! - [`CancelReason`] / [`CancelKind`]: why work was asked to stop
//! - [`Outcome`]: four-valued result of a unit of work
//! - [`TaskState`]: the tri-state lifecycle of a task handle
//! - [`Priority`]: scheduling hint

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::TaskId;
pub use outcome::{join_outcomes, Outcome, OutcomeError, PanicPayload};

use core::fmt;

/// Lifecycle of a scheduled unit of work.
///
/// Transitions are monotonic: `Running → CancelRequested → Finished` or
/// `Running → Finished`. A finished task never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The work is scheduled or executing.
    Running,
    /// Cancellation was requested; the work has not yet reached a terminal state.
    CancelRequested,
    /// The work reached a terminal state (value, error, cancelled or panicked).
    Finished,
}

impl TaskState {
    /// Returns true once the work reached a terminal state.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::CancelRequested => write!(f, "cancel-requested"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Scheduling hint attached to spawned work.
///
/// Priority is advisory: it picks the scheduler lane a task is queued on but
/// never preempts running work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Background work; runs when nothing else is queued.
    Low,
    /// Default lane.
    #[default]
    Normal,
    /// Latency-sensitive work (user initiated).
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}
