//! TaskHandle for awaiting and cancelling spawned work.
//!
//! `TaskHandle<T>` is returned by every spawn operation. It carries the
//! task ID, the task's lifecycle state, its priority hint and the completion
//! signal. A cheap [`CancelHandle`] can be split off for tracking in a
//! [`TaskRegistry`](super::TaskRegistry).
//!
//! Dropping a `TaskHandle` does not cancel the task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::channel::oneshot;
use crate::cx::Cx;
use crate::error::Error;
use crate::time::driver;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, PanicPayload, Priority, TaskId, TaskState};

/// Error returned when joining a spawned task fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The task was cancelled before it started, or its body was dropped
    /// by runtime shutdown. A started task that observes a cancel returns
    /// its own value instead.
    #[error("task was cancelled: {0}")]
    Cancelled(CancelReason),
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
}

impl JoinError {
    /// Returns true if the task was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if the task panicked.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Cancelled(reason) => Self::cancelled(&reason),
            JoinError::Panicked(payload) => Self::child_panicked(&payload),
        }
    }
}

/// A handle to a spawned task.
///
/// # Cancel Safety
///
/// If [`join`](Self::join) is cancelled while waiting, the handle can be
/// joined again. The task keeps running.
///
/// ```ignore
/// let handle = cx.spawn(|_| async { 42 })?;
/// match handle.join(&cx).await {
///     Ok(value) => assert_eq!(value, 42),
///     Err(JoinError::Cancelled(r)) => println!("cancelled: {r}"),
///     Err(JoinError::Panicked(p)) => println!("panicked: {p}"),
/// }
/// ```
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    token: CancelToken,
    priority: Priority,
    receiver: oneshot::Receiver<Result<T, JoinError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        token: CancelToken,
        priority: Priority,
        receiver: oneshot::Receiver<Result<T, JoinError>>,
    ) -> Self {
        Self {
            id,
            token,
            priority,
            receiver,
        }
    }

    /// Returns the task ID of the spawned task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the priority lane the task was queued on.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the task's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.token.state()
    }

    /// Returns true once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.token.is_finished()
    }

    /// Returns true if cancellation was requested, even if the task has
    /// since finished.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancel_requested()
    }

    /// Requests cancellation. Idempotent; a no-op on a finished task.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::user("task handle cancelled"))
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let cancelled = self.token.cancel(reason);
        if cancelled {
            debug!(task_id = %self.id, "task cancel requested");
        }
        cancelled
    }

    /// Splits off a cheap handle that can only observe and cancel the task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            token: self.token.clone(),
        }
    }

    /// Cancels the task with [`CancelReason::timeout`] once `duration` elapses,
    /// unless it finished first.
    pub fn cancel_after(&self, duration: Duration) {
        self.cancel_handle().cancel_after(duration);
    }

    /// Takes the result if the task already completed.
    pub fn try_join(&mut self) -> Option<Result<T, JoinError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::TryRecvError::Empty) => None,
            Err(oneshot::TryRecvError::Closed) => Some(Err(self.closed_error())),
        }
    }

    /// Waits for the task to complete, giving up if `cx` is cancelled.
    ///
    /// # Errors
    ///
    /// `JoinError::Cancelled` if the task never started or was dropped, or
    /// if `cx` was cancelled while waiting (the handle can then be joined
    /// again).
    /// `JoinError::Panicked` if the task panicked.
    pub async fn join(&mut self, cx: &Cx) -> Result<T, JoinError> {
        match cx.run_cancellable(&mut *self).await {
            Ok(result) => result,
            Err(err) => Err(JoinError::Cancelled(
                err.cancel_reason().cloned().unwrap_or_default(),
            )),
        }
    }

    fn closed_error(&self) -> JoinError {
        // The body was dropped without completing: runtime shutdown, or a
        // spawn that arrived after shutdown.
        JoinError::Cancelled(self.token.reason().unwrap_or_else(CancelReason::shutdown))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.closed_error())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancel-only view of a task: its ID and cancellation token.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: TaskId,
    token: CancelToken,
}

impl CancelHandle {
    /// Returns the task ID.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.token.state()
    }

    /// Returns true once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.token.is_finished()
    }

    /// Requests cancellation. Idempotent; a no-op on a finished task.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::user("task handle cancelled"))
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.token.cancel(reason)
    }

    /// Arms a timer that cancels the task with [`CancelReason::timeout`].
    pub fn cancel_after(&self, duration: Duration) {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            return;
        };
        let waker = Waker::from(Arc::new(CancelOnWake {
            token: self.token.clone(),
        }));
        if driver::global().register(deadline, &waker).is_none() {
            // No timer thread: fall back to a one-off sleeper thread.
            let token = self.token.clone();
            let spawned = std::thread::Builder::new()
                .name("taskweave-cancel-after".into())
                .spawn(move || {
                    std::thread::sleep(duration);
                    token.cancel(CancelReason::timeout());
                });
            if spawned.is_err() {
                debug!(task_id = %self.id, "cancel_after could not arm a timer");
            }
        }
    }
}

struct CancelOnWake {
    token: CancelToken,
}

impl Wake for CancelOnWake {
    fn wake(self: Arc<Self>) {
        self.token.cancel(CancelReason::timeout());
    }
}
