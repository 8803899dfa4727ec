//! Async FIFO mutex with cancel-aware acquisition.
//!
//! Waiting for the lock suspends the task instead of blocking the worker
//! thread. Acquisition has two phases:
//! - **Wait**: queue up until the lock is free and this waiter is at the
//!   front. Cancel-safe: a cancelled waiter leaves the queue and holds
//!   nothing.
//! - **Hold**: the guard. Released on drop, including during unwinding, in
//!   which case the mutex is poisoned.
//!
//! The guard is `!Send`, so a spawned task cannot keep it across an
//! `.await`. Exclusive sections are meant to be short and synchronous.
//!
//! # Example
//!
//! ```ignore
//! use taskweave::sync::Mutex;
//!
//! let mutex = Mutex::new(0);
//! {
//!     let mut guard = mutex.lock(&cx).await?;
//!     *guard += 1;
//! }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use crate::cx::Cx;
use crate::tracing_compat::trace;

/// Error returned when mutex locking fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// A panic occurred while the lock was held.
    #[error("mutex poisoned")]
    Poisoned,
    /// Cancelled while waiting for the lock.
    #[error("mutex lock cancelled")]
    Cancelled,
}

/// Error returned when trying to lock without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryLockError {
    /// The mutex is held or has queued waiters.
    #[error("mutex is locked")]
    Locked,
    /// A panic occurred while the lock was held.
    #[error("mutex poisoned")]
    Poisoned,
}

/// An async mutual-exclusion lock.
///
/// Waiters are served in arrival order.
#[derive(Debug)]
pub struct Mutex<T> {
    data: parking_lot::Mutex<T>,
    poisoned: AtomicBool,
    state: parking_lot::Mutex<MutexState>,
}

#[derive(Debug)]
struct MutexState {
    locked: bool,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Waker,
}

impl MutexState {
    fn wake_front(&self) {
        if let Some(front) = self.waiters.front() {
            front.waker.wake_by_ref();
        }
    }
}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            data: parking_lot::Mutex::new(value),
            poisoned: AtomicBool::new(false),
            state: parking_lot::Mutex::new(MutexState {
                locked: false,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// Returns true if the mutex is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Returns true if a panic occurred while the lock was held.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Clears the poison flag.
    pub fn clear_poison(&self) {
        self.poisoned.store(false, Ordering::Release);
    }

    /// Returns the number of tasks currently waiting for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquires the mutex, suspending until it is available.
    ///
    /// # Errors
    ///
    /// `LockError::Poisoned` if the mutex was poisoned before or while
    /// waiting; `LockError::Cancelled` if `cx` was cancelled while waiting.
    pub async fn lock(&self, cx: &Cx) -> Result<MutexGuard<'_, T>, LockError> {
        if self.is_poisoned() {
            cx.trace("mutex::lock failed: poisoned");
            return Err(LockError::Poisoned);
        }

        let acquire = Acquire {
            mutex: self,
            waiter_id: None,
        };
        if cx.run_cancellable(acquire).await.is_err() {
            cx.trace("mutex::lock cancelled while waiting");
            return Err(LockError::Cancelled);
        }

        let guard = self.guard();
        if self.is_poisoned() {
            return Err(LockError::Poisoned);
        }
        Ok(guard)
    }

    /// Acquires the mutex if it is free and nobody is queued.
    ///
    /// # Errors
    ///
    /// `TryLockError::Locked` if the lock is held or contended;
    /// `TryLockError::Poisoned` if the mutex was poisoned.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        if self.is_poisoned() {
            return Err(TryLockError::Poisoned);
        }
        {
            let mut state = self.state.lock();
            if state.locked || !state.waiters.is_empty() {
                return Err(TryLockError::Locked);
            }
            state.locked = true;
        }
        Ok(self.guard())
    }

    /// Consumes the mutex, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the data; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Builds the guard for a caller that already owns the logical lock.
    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            data: self.data.lock(),
            _release: Release {
                state: &self.state,
                poisoned: &self.poisoned,
            },
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Waits in the queue until this waiter owns the logical lock.
struct Acquire<'a, T> {
    mutex: &'a Mutex<T>,
    waiter_id: Option<u64>,
}

impl<T> Future for Acquire<'_, T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mutex = self.mutex;
        let mut state = mutex.state.lock();
        let at_front = match (self.waiter_id, state.waiters.front()) {
            (_, None) => true,
            (Some(id), Some(front)) => front.id == id,
            (None, Some(_)) => false,
        };

        if !state.locked && at_front {
            state.locked = true;
            if let Some(id) = self.waiter_id.take() {
                state.waiters.retain(|w| w.id != id);
            }
            return Poll::Ready(());
        }

        match self.waiter_id {
            Some(id) => {
                if let Some(waiter) = state.waiters.iter_mut().find(|w| w.id == id) {
                    if !waiter.waker.will_wake(cx.waker()) {
                        waiter.waker = cx.waker().clone();
                    }
                }
            }
            None => {
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter {
                    id,
                    waker: cx.waker().clone(),
                });
                drop(state);
                self.waiter_id = Some(id);
                trace!(waiter = id, "mutex waiter queued");
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for Acquire<'_, T> {
    fn drop(&mut self) {
        let Some(id) = self.waiter_id.take() else {
            return;
        };
        let mut state = self.mutex.state.lock();
        let was_front = state.waiters.front().is_some_and(|w| w.id == id);
        state.waiters.retain(|w| w.id != id);
        // A release may have woken this waiter; pass the turn on.
        if was_front && !state.locked {
            state.wake_front();
        }
    }
}

/// Releases the logical lock after the data guard is gone.
struct Release<'a> {
    state: &'a parking_lot::Mutex<MutexState>,
    poisoned: &'a AtomicBool,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.poisoned.store(true, Ordering::Release);
        }
        let mut state = self.state.lock();
        state.locked = false;
        state.wake_front();
    }
}

/// Exclusive access to the data of a [`Mutex`].
///
/// Field order matters: the data guard is dropped before the logical lock
/// is released.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T> {
    data: parking_lot::MutexGuard<'a, T>,
    _release: Release<'a>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MutexGuard").field(&*self.data).finish()
    }
}
