//! Spawned task storage and the supervision wrapper every task runs under.
//!
//! A [`Task`] owns a type-erased future and is its own waker: waking it
//! queues it on the scheduler at most once until it is polled again.
//!
//! User futures are wrapped in [`Supervised`], which
//! - never starts a future whose scope was cancelled before its first poll,
//! - turns a panic into [`JoinError::Panicked`].
//!
//! Cancellation of a started future is cooperative: the supervisor keeps
//! polling it until it returns, so cleanup after a cancel runs to the end.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::channel::oneshot;
use crate::cx::Cx;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::task_handle::{JoinError, TaskHandle};
use crate::tracing_compat::{debug, trace};
use crate::types::{PanicPayload, Priority, TaskId};

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct Task {
    id: TaskId,
    priority: Priority,
    future: Mutex<Option<BoxedFuture>>,
    scheduled: AtomicBool,
    scheduler: Arc<Scheduler>,
}

impl Task {
    fn new(id: TaskId, priority: Priority, future: BoxedFuture, scheduler: &Arc<Scheduler>) -> Self {
        Self {
            id,
            priority,
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(false),
            scheduler: Arc::clone(scheduler),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(scheduler: &Arc<Scheduler>, priority: Priority) -> Arc<Self> {
        Arc::new(Self::new(
            TaskId::next(),
            priority,
            Box::pin(std::future::ready(())),
            scheduler,
        ))
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    /// Queues the task unless it is already queued.
    fn schedule(self: &Arc<Self>) {
        if self.scheduler.is_terminated() {
            self.abandon();
            return;
        }
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.scheduler.push(Arc::clone(self));
        }
    }

    /// Polls the future once.
    pub(crate) fn run(self: &Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let waker = Waker::from(Arc::clone(self));
        let mut task_cx = Context::from_waker(&waker);

        let finished = {
            let mut slot = self.future.lock();
            let Some(future) = slot.as_mut() else {
                return;
            };
            if future.as_mut().poll(&mut task_cx).is_ready() {
                slot.take()
            } else if self.scheduler.is_terminated() {
                // Woken during the poll after termination; nobody will run it again.
                slot.take()
            } else {
                None
            }
        };
        drop(finished);
    }

    /// Drops the future without polling it.
    ///
    /// A future that is being polled right now is left to the polling worker,
    /// which drops it after the poll once it sees termination.
    pub(crate) fn abandon(&self) {
        let future = self.future.try_lock().and_then(|mut slot| slot.take());
        if future.is_some() {
            trace!(task_id = %self.id, "task abandoned");
        }
        drop(future);
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Finishes the task's token before the result becomes observable, including
/// when the future is dropped without completing.
struct Completion<T> {
    token: CancelToken,
    sender: Option<oneshot::Sender<Result<T, JoinError>>>,
}

impl<T> Completion<T> {
    fn complete(mut self, result: Result<T, JoinError>) {
        self.token.finish();
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.token.finish();
    }
}

pub(crate) struct Supervised<F> {
    future: Pin<Box<F>>,
    token: CancelToken,
    task_id: TaskId,
    started: bool,
}

impl<F: Future> Supervised<F> {
    pub(crate) fn new(future: F, token: CancelToken, task_id: TaskId) -> Self {
        Self {
            future: Box::pin(future),
            token,
            task_id,
            started: false,
        }
    }
}

impl<F: Future> Future for Supervised<F> {
    type Output = Result<F::Output, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.started {
            this.started = true;
            if this.token.is_cancel_requested() {
                let reason = this.token.reason().unwrap_or_default();
                trace!(task_id = %this.task_id, reason = %reason, "cancelled before first poll");
                return Poll::Ready(Err(JoinError::Cancelled(reason)));
            }
        }

        match catch_unwind(AssertUnwindSafe(|| this.future.as_mut().poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => {
                let payload = PanicPayload::from_panic(&*payload);
                debug!(task_id = %this.task_id, panic = %payload, "task panicked");
                Poll::Ready(Err(JoinError::Panicked(payload)))
            }
        }
    }
}

/// Spawns `future` as the body of the task owning `cx`.
pub(crate) fn spawn<F>(scheduler: &Arc<Scheduler>, cx: &Cx, future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task_id = cx.task_id();
    let priority = cx.priority();
    let token = cx.cancel_token().clone();
    token.bind_task();
    let (sender, receiver) = oneshot::channel();

    let completion = Completion {
        token: token.clone(),
        sender: Some(sender),
    };
    let supervised = Supervised::new(future, token.clone(), task_id);
    let body = async move {
        let result = supervised.await;
        completion.complete(result);
    };

    let task = Arc::new(Task::new(task_id, priority, Box::pin(body), scheduler));
    if scheduler.is_shutdown() {
        debug!(task_id = %task_id, "spawn after shutdown; task dropped");
        drop(task);
    } else {
        trace!(task_id = %task_id, priority = %priority, "task spawned");
        task.schedule();
    }
    TaskHandle::new(task_id, token, priority, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::types::CancelReason;

    #[test]
    fn supervised_skips_future_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel(CancelReason::user("never mind"));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let supervised = Supervised::new(
            async move {
                flag.store(true, Ordering::SeqCst);
            },
            token,
            TaskId::new_for_test(1),
        );
        let result = block_on(supervised);
        assert!(matches!(result, Err(JoinError::Cancelled(_))));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_future_runs_its_cleanup() {
        let token = CancelToken::new();
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let started = Arc::new(AtomicBool::new(false));
        let running = Arc::clone(&started);
        let watched = token.clone();
        let supervised = Supervised::new(
            async move {
                running.store(true, Ordering::SeqCst);
                watched.cancelled().await;
                crate::runtime::yield_now().await;
                flag.store(true, Ordering::SeqCst);
                "cleaned up"
            },
            token.clone(),
            TaskId::new_for_test(3),
        );
        let canceller = std::thread::spawn(move || {
            while !started.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            token.cancel(CancelReason::user("stop"));
        });
        let result = block_on(supervised);
        canceller.join().unwrap();
        assert_eq!(result, Ok("cleaned up"));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn supervised_catches_panics() {
        let supervised = Supervised::new(
            async {
                panic!("boom");
            },
            CancelToken::new(),
            TaskId::new_for_test(2),
        );
        match block_on(supervised) {
            Err(JoinError::Panicked(payload)) => assert_eq!(payload.message(), "boom"),
            other => panic!("expected panic, got {other:?}"),
        }
    }

    #[test]
    fn completion_dropped_finishes_token() {
        let token = CancelToken::new();
        let (sender, mut receiver) = oneshot::channel::<Result<(), JoinError>>();
        drop(Completion {
            token: token.clone(),
            sender: Some(sender),
        });
        assert!(token.is_finished());
        assert_eq!(receiver.try_recv(), Err(oneshot::TryRecvError::Closed));
    }
}
