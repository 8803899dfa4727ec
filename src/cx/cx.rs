//! The capability context type.
//!
//! `Cx` grants access to:
//! - Querying identity (task ID, priority hint)
//! - Checking and requesting cancellation
//! - Spawning child work
//! - Yielding and sleeping
//! - Tracing
//!
//! # Cancellation tree
//!
//! Each `Cx` owns a [`CancelToken`]. [`Cx::child`] and [`Cx::spawn`] create
//! child tokens, so cancelling a context cancels everything started under it.
//! A child never cancels its parent.
//!
//! # Cloning
//!
//! `Cx` is a cheap `Arc` handle; clones share identity and cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, ErrorKind};
use crate::runtime::{RuntimeHandle, TaskHandle, ViolationResponse};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, Priority, TaskId};

/// The capability context for a unit of work.
#[derive(Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

struct CxInner {
    task_id: TaskId,
    token: CancelToken,
    runtime: Option<RuntimeHandle>,
    priority: Priority,
}

impl Cx {
    pub(crate) fn new(
        task_id: TaskId,
        token: CancelToken,
        runtime: Option<RuntimeHandle>,
        priority: Priority,
    ) -> Self {
        Self {
            inner: Arc::new(CxInner {
                task_id,
                token,
                runtime,
                priority,
            }),
        }
    }

    /// Creates a detached root context with no runtime attached.
    ///
    /// Cancellation, checkpoints, sleeping and bridging work; spawning
    /// returns [`ErrorKind::NoRuntime`].
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(TaskId::next(), CancelToken::new(), None, Priority::Normal)
    }

    /// Returns the task ID of this context.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    /// Returns the scheduling hint new children inherit.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Returns the cancellation token of this scope.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// Returns the runtime this context spawns onto, if any.
    #[must_use]
    pub fn runtime(&self) -> Option<&RuntimeHandle> {
        self.inner.runtime.as_ref()
    }

    pub(crate) fn require_runtime(&self) -> Result<&RuntimeHandle, Error> {
        self.inner.runtime.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NoRuntime)
                .with_message("context has no runtime to spawn onto")
                .with_task(self.inner.task_id)
        })
    }

    /// Returns true if cancellation has been requested for this scope.
    ///
    /// Long-running synchronous loops should poll this between items.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.token.is_cancel_requested()
    }

    /// Returns the reason this scope was cancelled with, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.token.reason()
    }

    /// Requests cancellation of this scope and everything started under it.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.inner.token.cancel(reason)
    }

    /// Checks for cancellation and returns an error if cancelled.
    ///
    /// # Errors
    ///
    /// Returns an `Err` with kind `ErrorKind::Cancelled` carrying the
    /// cancellation reason.
    ///
    /// ```ignore
    /// for item in items {
    ///     cx.checkpoint()?;
    ///     process(item);
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), Error> {
        self.inner
            .token
            .checkpoint()
            .map_err(|e| e.with_task(self.inner.task_id))
    }

    /// Creates a child scope: new task ID, child cancel token, same runtime.
    #[must_use]
    pub fn child(&self) -> Self {
        self.child_with_priority(self.inner.priority)
    }

    pub(crate) fn child_with_priority(&self, priority: Priority) -> Self {
        Self::new(
            TaskId::next(),
            self.inner.token.child(),
            self.inner.runtime.clone(),
            priority,
        )
    }

    /// Spawns `f` as a child task of this scope.
    ///
    /// The closure receives the child's own `Cx`. Cancelling this scope
    /// cancels the child; the child finishing or failing never affects this
    /// scope.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NoRuntime`] if the context is not attached to a runtime.
    pub fn spawn<F, Fut>(&self, f: F) -> Result<TaskHandle<Fut::Output>, Error>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.spawn_with_priority(self.inner.priority, f)
    }

    /// Spawns `f` as a child task on the given priority lane.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NoRuntime`] if the context is not attached to a runtime.
    pub fn spawn_with_priority<F, Fut>(
        &self,
        priority: Priority,
        f: F,
    ) -> Result<TaskHandle<Fut::Output>, Error>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let runtime = self.require_runtime()?;
        let child = self.child_with_priority(priority);
        let future = f(child.clone());
        Ok(runtime.spawn_scoped(&child, future))
    }

    /// Drives `fut` until it completes or this scope is cancelled.
    ///
    /// Cancellation is checked before every poll of `fut`, so a cancelled
    /// caller never observes a value produced after the cancel request.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` if the scope was cancelled before or while
    /// waiting. `fut` is dropped in that case.
    pub async fn run_cancellable<F: Future>(&self, fut: F) -> Result<F::Output, Error> {
        self.checkpoint()?;
        let mut fut = std::pin::pin!(fut);
        let mut cancelled = self.inner.token.cancelled();
        std::future::poll_fn(|task_cx| {
            if let Poll::Ready(reason) = Pin::new(&mut cancelled).poll(task_cx) {
                return Poll::Ready(Err(
                    Error::cancelled(&reason).with_task(self.inner.task_id)
                ));
            }
            fut.as_mut().poll(task_cx).map(Ok)
        })
        .await
    }

    /// Sleeps for `duration`, waking early if the scope is cancelled.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` if the scope was cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        self.run_cancellable(crate::time::sleep(duration)).await
    }

    /// Yields once to the scheduler, then checks for cancellation.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` if the scope was cancelled.
    pub async fn yield_now(&self) -> Result<(), Error> {
        crate::runtime::yield_now().await;
        self.checkpoint()
    }

    /// Emits a trace-level event tagged with this task's ID.
    pub fn trace(&self, message: &str) {
        trace!(task_id = %self.inner.task_id, message);
    }

    /// Returns how broken usage contracts are reported in this scope.
    #[must_use]
    pub fn violation_response(&self) -> ViolationResponse {
        self.inner
            .runtime
            .as_ref()
            .map_or_else(ViolationResponse::default, |rt| {
                rt.config().violation_response
            })
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx")
            .field("task_id", &self.inner.task_id)
            .field("priority", &self.inner.priority)
            .field("state", &self.inner.token.state())
            .field("has_runtime", &self.inner.runtime.is_some())
            .finish()
    }
}
