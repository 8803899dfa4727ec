use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::Error;
use crate::tracing_compat::trace;
use crate::types::{CancelReason, TaskState};

const RUNNING: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const FINISHED: u8 = 2;

/// Shared cancellation flag with waker registration and child propagation.
///
/// Cloning a token yields another handle to the same flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    state: AtomicU8,
    /// Stays set after `finish()` so callers can tell a cancelled task from
    /// one that completed normally.
    requested: AtomicBool,
    /// Set when a spawned task owns this token. Bare scopes hand their
    /// reason down unchanged; tasks hand down `ParentCancelled`.
    task_bound: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    waiters: Mutex<Waiters>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

#[derive(Default)]
struct Waiters {
    entries: Vec<(u64, Waker)>,
    next_id: u64,
}

static TOKEN_COUNT: AtomicU64 = AtomicU64::new(0);

impl CancelToken {
    /// Creates a new root token.
    #[must_use]
    pub fn new() -> Self {
        TOKEN_COUNT.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(TokenInner {
                state: AtomicU8::new(RUNNING),
                requested: AtomicBool::new(false),
                task_bound: AtomicBool::new(false),
                reason: Mutex::new(None),
                waiters: Mutex::new(Waiters::default()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a child token.
    ///
    /// If this token already requested cancellation the child starts out
    /// cancelled with the reason this token hands down.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Checked after registration: a concurrent cancel either sees the
        // child in the list or we see the flag here.
        if self.is_cancel_requested() {
            if let Some(reason) = self.reason() {
                child.cancel(self.handed_down(reason));
            }
        }
        child
    }

    /// Marks this token as owned by a spawned task.
    pub(crate) fn bind_task(&self) {
        self.inner.task_bound.store(true, Ordering::Release);
    }

    /// Requests cancellation of this token and all of its descendants.
    ///
    /// Returns `true` if this call performed the transition; `false` if the
    /// token had already requested cancellation or finished. A finished
    /// token keeps its state but still cascades to its live descendants.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        match self.inner.state.compare_exchange(
            RUNNING,
            CANCEL_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(FINISHED) => {
                self.cascade(&reason);
                return false;
            }
            Err(_) => return false,
        }
        *self.inner.reason.lock() = Some(reason.clone());
        self.inner.requested.store(true, Ordering::Release);
        trace!(reason = %reason, "cancel requested");

        let wakers: Vec<Waker> = {
            let mut waiters = self.inner.waiters.lock();
            waiters.entries.drain(..).map(|(_, waker)| waker).collect()
        };
        for waker in wakers {
            waker.wake();
        }

        self.cascade(&reason);
        true
    }

    fn cascade(&self, reason: &CancelReason) {
        let children: Vec<Arc<TokenInner>> = {
            let children = self.inner.children.lock();
            children.iter().filter_map(Weak::upgrade).collect()
        };
        if children.is_empty() {
            return;
        }
        let inherited = self.handed_down(reason.clone());
        for child in children {
            Self { inner: child }.cancel(inherited.clone());
        }
    }

    /// Reason handed to descendants. Shutdown stays shutdown. A task hands
    /// down `ParentCancelled`; a bare scope hands down its own reason, so
    /// work under a fan-out group sees the group's `FailFast`.
    fn handed_down(&self, reason: CancelReason) -> CancelReason {
        if reason.is_shutdown() || !self.inner.task_bound.load(Ordering::Acquire) {
            reason
        } else {
            CancelReason::parent_cancelled()
        }
    }

    /// Marks the owning work as finished.
    ///
    /// After this, `cancel()` no longer changes this token's state but still
    /// reaches its descendants.
    pub fn finish(&self) {
        self.inner.state.store(FINISHED, Ordering::Release);
        // Anyone still waiting for cancellation on a finished scope would wait
        // forever; drop their wakers.
        self.inner.waiters.lock().entries.clear();
    }

    /// Returns the lifecycle state of the owning work.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self.inner.state.load(Ordering::Acquire) {
            RUNNING => TaskState::Running,
            CANCEL_REQUESTED => TaskState::CancelRequested,
            _ => TaskState::Finished,
        }
    }

    /// Returns true if cancellation was ever requested, even if the work
    /// has since finished.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Returns true once `finish()` was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FINISHED
    }

    /// Returns the reason cancellation was requested with, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().clone()
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), Error> {
        if self.is_cancel_requested() {
            let reason = self.reason().unwrap_or_default();
            return Err(Error::cancelled(&reason));
        }
        Ok(())
    }

    /// Returns a future that resolves when cancellation is requested.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            token: self.clone(),
            waiter: None,
        }
    }

    /// Returns true if both handles refer to the same token.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn register(&self, waiter: Option<u64>, waker: &Waker) -> u64 {
        let mut waiters = self.inner.waiters.lock();
        if let Some(id) = waiter {
            if let Some((_, existing)) = waiters.entries.iter_mut().find(|(i, _)| *i == id) {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }
                return id;
            }
        }
        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.entries.push((id, waker.clone()));
        id
    }

    fn deregister(&self, id: u64) {
        self.inner.waiters.lock().entries.retain(|(i, _)| *i != id);
    }

    /// Number of tokens created in this process; used by leak tests.
    #[doc(hidden)]
    #[must_use]
    pub fn created_count() -> u64 {
        TOKEN_COUNT.load(Ordering::Relaxed)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("state", &self.state())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Future returned by [`CancelToken::cancelled`].
///
/// Resolves with the cancellation reason. Never resolves for a token that
/// finishes without being cancelled.
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled {
    token: CancelToken,
    waiter: Option<u64>,
}

impl Future for Cancelled {
    type Output = CancelReason;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CancelReason> {
        if self.token.is_cancel_requested() {
            if let Some(id) = self.waiter.take() {
                self.token.deregister(id);
            }
            return Poll::Ready(self.token.reason().unwrap_or_default());
        }
        let id = self.token.register(self.waiter, cx.waker());
        self.waiter = Some(id);
        // Re-check after registration to close the race with `cancel()`,
        // which sets the flag before draining waiters.
        if self.token.is_cancel_requested() {
            self.token.deregister(id);
            self.waiter = None;
            return Poll::Ready(self.token.reason().unwrap_or_default());
        }
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.token.deregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert_eq!(token.state(), TaskState::Running);
        assert!(token.cancel(CancelReason::user("first")));
        assert!(!token.cancel(CancelReason::shutdown()));
        assert_eq!(token.state(), TaskState::CancelRequested);
        assert_eq!(token.reason(), Some(CancelReason::user("first")));
    }

    #[test]
    fn cancel_after_finish_is_noop() {
        let token = CancelToken::new();
        token.finish();
        assert!(!token.cancel(CancelReason::user("late")));
        assert!(!token.is_cancel_requested());
        assert_eq!(token.state(), TaskState::Finished);
    }

    #[test]
    fn finished_token_remembers_cancellation() {
        let token = CancelToken::new();
        token.cancel(CancelReason::timeout());
        token.finish();
        assert!(token.is_cancel_requested());
        assert!(token.is_finished());
    }

    #[test]
    fn cancellation_propagates_down_not_up() {
        let parent = CancelToken::new();
        parent.bind_task();
        let child = parent.child();
        let grandchild = child.child();
        let sibling = parent.child();

        child.cancel(CancelReason::user("child only"));
        assert!(grandchild.is_cancel_requested());
        assert!(!parent.is_cancel_requested());
        assert!(!sibling.is_cancel_requested());

        parent.cancel(CancelReason::user("parent"));
        assert!(sibling.is_cancel_requested());
        assert_eq!(
            sibling.reason().map(|r| r.kind),
            Some(CancelKind::ParentCancelled)
        );
        // Already-cancelled child keeps its own reason.
        assert_eq!(child.reason(), Some(CancelReason::user("child only")));
    }

    #[test]
    fn bare_scope_hands_down_its_own_reason() {
        let group = CancelToken::new();
        let member = group.child();
        member.bind_task();
        let nested = member.child();

        group.cancel(CancelReason::sibling_failed());
        assert_eq!(member.reason().map(|r| r.kind), Some(CancelKind::FailFast));
        assert_eq!(
            nested.reason().map(|r| r.kind),
            Some(CancelKind::ParentCancelled)
        );
        assert_eq!(
            group.child().reason().map(|r| r.kind),
            Some(CancelKind::FailFast)
        );
    }

    #[test]
    fn cancel_reaches_descendants_of_finished_task() {
        let scope = CancelToken::new();
        let task = scope.child();
        task.bind_task();
        let grandchild = task.child();
        grandchild.bind_task();
        let great = grandchild.child();
        task.finish();

        assert!(!task.cancel(CancelReason::user("late")));
        assert!(!task.is_cancel_requested());
        assert!(grandchild.is_cancel_requested());
        assert!(great.is_cancel_requested());

        let other = scope.child();
        other.bind_task();
        let orphan = other.child();
        other.finish();
        scope.cancel(CancelReason::user("scope closed"));
        assert!(!other.is_cancel_requested());
        assert_eq!(
            orphan.reason().map(|r| r.kind),
            Some(CancelKind::ParentCancelled)
        );
    }

    #[test]
    fn shutdown_reaches_descendants_as_shutdown() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();
        root.cancel(CancelReason::shutdown());
        assert!(child.reason().is_some_and(|r| r.is_shutdown()));
        assert!(grandchild.reason().is_some_and(|r| r.is_shutdown()));
        assert!(root.child().reason().is_some_and(|r| r.is_shutdown()));
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let parent = CancelToken::new();
        parent.cancel(CancelReason::user("gone"));
        let child = parent.child();
        assert!(child.is_cancel_requested());
    }

    #[test]
    fn cancelled_future_wakes_on_cancel() {
        let token = CancelToken::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);

        let mut fut = token.cancelled();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        // Re-polling with the same waker does not add a second entry.
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        token.cancel(CancelReason::user("wake"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            Pin::new(&mut fut).poll(&mut cx),
            Poll::Ready(CancelReason::user("wake"))
        );
    }

    #[test]
    fn dropped_waiter_is_deregistered() {
        let token = CancelToken::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);

        let mut fut = token.cancelled();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        drop(fut);
        token.cancel(CancelReason::user("nobody listening"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn checkpoint_reports_reason() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel(CancelReason::timeout());
        let err = token.checkpoint().unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.is_timeout());
    }
}
