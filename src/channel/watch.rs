//! Latest-value channel for publishing observable state.
//!
//! A watch channel holds exactly one value. The sender replaces it; any
//! number of receivers read the latest value and wait for the next change.
//! There is no queue: a receiver that falls behind skips straight to the
//! newest value.
//!
//! # Cancel Safety
//!
//! [`Receiver::changed`] is cancel-safe: cancelling the wait leaves the
//! receiver's seen version untouched, so the next call sees the same change.
//!
//! ```ignore
//! use taskweave::channel::watch;
//!
//! let (tx, mut rx) = watch::channel(Settings::default());
//!
//! cx.spawn(move |cx| async move {
//!     while rx.changed(&cx).await.is_ok() {
//!         apply(rx.borrow_and_clone());
//!     }
//! })?;
//!
//! tx.send(new_settings)?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::cx::Cx;

/// Error returned by [`Sender::send`] when every receiver is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError<T> {
    /// No receivers remain; the value is handed back.
    #[error("sending on a closed watch channel")]
    Closed(T),
}

/// Error returned by [`Receiver::changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The sender was dropped and no unseen value remains.
    #[error("watch channel sender was dropped")]
    Closed,
    /// The waiting context was cancelled.
    #[error("watch receive operation cancelled")]
    Cancelled,
}

/// Waiter entry. The `queued` flag is shared with the owning receiver so a
/// re-poll refreshes the existing entry instead of adding another.
struct WatchWaiter {
    waker: Waker,
    queued: Arc<AtomicBool>,
}

struct Shared {
    receiver_count: usize,
    sender_dropped: bool,
    waiters: Vec<WatchWaiter>,
}

struct WatchInner<T> {
    value: RwLock<(T, u64)>,
    shared: Mutex<Shared>,
}

impl<T> WatchInner<T> {
    fn current_version(&self) -> u64 {
        self.value.read().1
    }

    fn is_sender_dropped(&self) -> bool {
        self.shared.lock().sender_dropped
    }

    fn wake_all_waiters(&self) {
        let waiters = std::mem::take(&mut self.shared.lock().waiters);
        for waiter in waiters {
            waiter.queued.store(false, Ordering::Release);
            waiter.waker.wake();
        }
    }

    fn register_waker(&self, queued: &Arc<AtomicBool>, waker: &Waker) {
        let mut shared = self.shared.lock();
        // Entries whose receiver is gone only hold their own Arc.
        shared
            .waiters
            .retain(|entry| Arc::strong_count(&entry.queued) > 1);
        if let Some(existing) = shared
            .waiters
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.queued, queued))
        {
            if !existing.waker.will_wake(waker) {
                existing.waker.clone_from(waker);
            }
            return;
        }
        queued.store(true, Ordering::Release);
        shared.waiters.push(WatchWaiter {
            waker: waker.clone(),
            queued: Arc::clone(queued),
        });
    }
}

/// Creates a watch channel holding `initial`.
#[must_use]
pub fn channel<T>(initial: T) -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(WatchInner {
        value: RwLock::new((initial, 0)),
        shared: Mutex::new(Shared {
            receiver_count: 1,
            sender_dropped: false,
            waiters: Vec::new(),
        }),
    });
    (
        Sender {
            inner: Arc::clone(&inner),
        },
        Receiver {
            inner,
            seen_version: 0,
            queued: Arc::new(AtomicBool::new(false)),
        },
    )
}

/// The publishing half of a watch channel.
pub struct Sender<T> {
    inner: Arc<WatchInner<T>>,
}

impl<T> Sender<T> {
    /// Replaces the value and notifies every receiver.
    ///
    /// # Errors
    ///
    /// Returns the value back if no receiver remains.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.is_closed() {
            return Err(SendError::Closed(value));
        }
        {
            let mut guard = self.inner.value.write();
            guard.0 = value;
            guard.1 += 1;
        }
        self.inner.wake_all_waiters();
        Ok(())
    }

    /// Modifies the value in place and notifies receivers, even with none
    /// subscribed. Returns what `f` returns.
    pub fn send_modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.inner.value.write();
            let result = f(&mut guard.0);
            guard.1 += 1;
            result
        };
        self.inner.wake_all_waiters();
        result
    }

    /// Borrows the current value.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        Ref {
            guard: self.inner.value.read(),
        }
    }

    /// Creates a receiver that has already seen the current value.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<T> {
        self.inner.shared.lock().receiver_count += 1;
        Receiver {
            inner: Arc::clone(&self.inner),
            seen_version: self.inner.current_version(),
            queued: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.inner.shared.lock().receiver_count
    }

    /// Returns true if every receiver was dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver_count() == 0
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.inner.shared.lock().sender_dropped = true;
        self.inner.wake_all_waiters();
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("watch::Sender")
            .field("version", &self.inner.current_version())
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// The observing half of a watch channel.
pub struct Receiver<T> {
    inner: Arc<WatchInner<T>>,
    seen_version: u64,
    queued: Arc<AtomicBool>,
}

impl<T> Receiver<T> {
    /// Waits for a value newer than the last one seen, or for `cx` to be
    /// cancelled.
    ///
    /// # Errors
    ///
    /// `RecvError::Closed` once the sender is gone and nothing unseen
    /// remains; `RecvError::Cancelled` if `cx` was cancelled.
    pub async fn changed(&mut self, cx: &Cx) -> Result<(), RecvError> {
        cx.trace("watch::changed starting wait");
        match cx.run_cancellable(Changed { receiver: self }).await {
            Ok(result) => result,
            Err(_) => {
                cx.trace("watch::changed cancelled");
                Err(RecvError::Cancelled)
            }
        }
    }

    /// Polls for a change without a `Cx`. Used by [`WatchStream`](crate::stream::WatchStream).
    pub(crate) fn poll_changed(&mut self, task_cx: &mut Context<'_>) -> Poll<Result<(), RecvError>> {
        if let Some(ready) = self.take_change() {
            return Poll::Ready(ready);
        }
        self.inner.register_waker(&self.queued, task_cx.waker());
        // Re-check after registration to close the race with `send`.
        self.take_change().map_or(Poll::Pending, Poll::Ready)
    }

    fn take_change(&mut self) -> Option<Result<(), RecvError>> {
        let current = self.inner.current_version();
        if current > self.seen_version {
            self.seen_version = current;
            return Some(Ok(()));
        }
        if self.inner.is_sender_dropped() {
            return Some(Err(RecvError::Closed));
        }
        None
    }

    /// Borrows the current value without marking it seen.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        Ref {
            guard: self.inner.value.read(),
        }
    }

    /// Borrows the current value and marks it seen.
    pub fn borrow_and_update(&mut self) -> Ref<'_, T> {
        let guard = self.inner.value.read();
        self.seen_version = guard.1;
        Ref { guard }
    }

    /// Clones the current value.
    #[must_use]
    pub fn borrow_and_clone(&self) -> T
    where
        T: Clone,
    {
        self.borrow().clone()
    }

    /// Marks the current value as seen.
    pub fn mark_seen(&mut self) {
        self.seen_version = self.inner.current_version();
    }

    /// Returns true if a value newer than the last seen one is available.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.inner.current_version() > self.seen_version
    }

    /// Returns true if the sender was dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_sender_dropped()
    }

    /// Version of the last value this receiver saw.
    #[must_use]
    pub fn seen_version(&self) -> u64 {
        self.seen_version
    }
}

struct Changed<'a, T> {
    receiver: &'a mut Receiver<T>,
}

impl<T> Future for Changed<'_, T> {
    type Output = Result<(), RecvError>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().receiver.poll_changed(task_cx)
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.inner.shared.lock().receiver_count += 1;
        Self {
            inner: Arc::clone(&self.inner),
            seen_version: self.seen_version,
            queued: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.receiver_count = shared.receiver_count.saturating_sub(1);
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("watch::Receiver")
            .field("seen_version", &self.seen_version)
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}

/// Read guard over the current value.
///
/// Holding it blocks the sender; keep it short.
pub struct Ref<'a, T> {
    guard: RwLockReadGuard<'a, (T, u64)>,
}

impl<T> std::ops::Deref for Ref<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::types::CancelReason;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn changed_sees_latest_value_only() {
        init_test("changed_sees_latest_value_only");
        let cx = Cx::for_testing();
        let (tx, mut rx) = channel(0);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert!(rx.has_changed());
        block_on(rx.changed(&cx)).unwrap();
        assert_eq!(*rx.borrow(), 2);
        assert!(!rx.has_changed());
        crate::test_complete!("changed_sees_latest_value_only");
    }

    #[test]
    fn changed_wakes_across_threads() {
        init_test("changed_wakes_across_threads");
        let cx = Cx::for_testing();
        let (tx, mut rx) = channel("idle");
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            tx.send("busy").unwrap();
            tx
        });
        block_on(rx.changed(&cx)).unwrap();
        assert_eq!(rx.borrow_and_clone(), "busy");
        drop(sender.join().unwrap());
        assert_eq!(block_on(rx.changed(&cx)), Err(RecvError::Closed));
        crate::test_complete!("changed_wakes_across_threads");
    }

    #[test]
    fn unseen_value_survives_sender_drop() {
        init_test("unseen_value_survives_sender_drop");
        let cx = Cx::for_testing();
        let (tx, mut rx) = channel(1);
        tx.send(5).unwrap();
        drop(tx);
        assert!(rx.is_closed());
        assert_eq!(block_on(rx.changed(&cx)), Ok(()));
        assert_eq!(*rx.borrow(), 5);
        assert_eq!(block_on(rx.changed(&cx)), Err(RecvError::Closed));
    }

    #[test]
    fn cancelled_wait_keeps_version() {
        init_test("cancelled_wait_keeps_version");
        let cx = Cx::for_testing();
        let (tx, mut rx) = channel(0u8);
        cx.cancel(CancelReason::user("stop"));
        assert_eq!(block_on(rx.changed(&cx)), Err(RecvError::Cancelled));
        tx.send(9).unwrap();
        assert!(rx.has_changed());
        assert_eq!(rx.seen_version(), 0);
    }

    #[test]
    fn subscribe_and_receiver_count() {
        init_test("subscribe_and_receiver_count");
        let (tx, rx) = channel(String::from("a"));
        tx.send("b".into()).unwrap();
        let late = tx.subscribe();
        assert!(!late.has_changed());
        assert_eq!(tx.receiver_count(), 2);
        let cloned = rx.clone();
        assert_eq!(tx.receiver_count(), 3);
        drop((rx, late, cloned));
        assert!(tx.is_closed());
        assert_eq!(tx.send("c".into()), Err(SendError::Closed("c".into())));
    }

    #[test]
    fn send_modify_bumps_version() {
        let (tx, mut rx) = channel(vec![1]);
        let len = tx.send_modify(|v| {
            v.push(2);
            v.len()
        });
        assert_eq!(len, 2);
        assert!(rx.has_changed());
        assert_eq!(*rx.borrow_and_update(), vec![1, 2]);
        assert!(!rx.has_changed());
    }
}
