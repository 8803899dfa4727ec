//! Single-use channel carrying exactly one value from one sender to one receiver.
//!
//! ```text
//!   Sender ── send(v) ──► Receiver.await ──► Ok(v)
//!   Sender ── (drop) ───► Receiver.await ──► Err(Closed)
//! ```
//!
//! The receiver is a [`Future`]; awaiting it directly is not cancel-aware.
//! [`Receiver::recv`] races the wait against the caller's [`Cx`].
//!
//! ```ignore
//! use taskweave::channel::oneshot;
//!
//! let (tx, rx) = oneshot::channel::<i32>();
//! tx.send(42)?;
//! let value = rx.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::cx::Cx;

/// Error returned when sending fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError<T> {
    /// The receiver was dropped before the value could be sent.
    #[error("sending on a closed oneshot channel")]
    Disconnected(T),
}

impl<T> SendError<T> {
    /// Returns the value that could not be delivered.
    pub fn into_inner(self) -> T {
        match self {
            Self::Disconnected(value) => value,
        }
    }
}

/// Error returned when receiving fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The sender was dropped without sending a value.
    #[error("receiving on a closed oneshot channel")]
    Closed,
    /// The receiving context was cancelled while waiting.
    #[error("oneshot receive cancelled")]
    Cancelled,
}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// No value yet.
    #[error("oneshot channel is empty")]
    Empty,
    /// The sender was dropped or the value was already taken.
    #[error("oneshot channel is closed")]
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    sender_alive: bool,
    receiver_alive: bool,
    taken: bool,
    rx_waker: Option<Waker>,
}

/// Creates a new oneshot channel.
#[must_use]
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Mutex::new(Inner {
        value: None,
        sender_alive: true,
        receiver_alive: true,
        taken: false,
        rx_waker: None,
    }));
    (
        Sender {
            inner: Arc::clone(&inner),
        },
        Receiver { inner },
    )
}

/// The sending half of a oneshot channel.
#[derive(Debug)]
pub struct Sender<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Sender<T> {
    /// Sends the value, consuming the sender.
    ///
    /// # Errors
    ///
    /// Returns the value back if the receiver is gone.
    pub fn send(self, value: T) -> Result<(), SendError<T>> {
        let waker = {
            let mut inner = self.inner.lock();
            if !inner.receiver_alive {
                return Err(SendError::Disconnected(value));
            }
            inner.value = Some(value);
            inner.rx_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Returns true if the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.lock().receiver_alive
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let waker = {
            let mut inner = self.inner.lock();
            inner.sender_alive = false;
            inner.rx_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// The receiving half of a oneshot channel.
#[derive(Debug)]
pub struct Receiver<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Receiver<T> {
    /// Waits for the value, giving up if `cx` is cancelled first.
    ///
    /// # Errors
    ///
    /// `RecvError::Cancelled` if `cx` was cancelled; `RecvError::Closed` if the
    /// sender was dropped without sending.
    pub async fn recv(&mut self, cx: &Cx) -> Result<T, RecvError> {
        match cx.run_cancellable(&mut *self).await {
            Ok(result) => result,
            Err(_) => {
                cx.trace("oneshot::recv cancelled");
                Err(RecvError::Cancelled)
            }
        }
    }

    /// Takes the value if it is already available.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.value.take() {
            inner.taken = true;
            return Ok(value);
        }
        if inner.taken || !inner.sender_alive {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Returns true if a value is waiting.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// Returns true if no value can arrive anymore.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock();
        inner.value.is_none() && (inner.taken || !inner.sender_alive)
    }
}

impl<T> Future for Receiver<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.value.take() {
            inner.taken = true;
            return Poll::Ready(Ok(value));
        }
        if inner.taken || !inner.sender_alive {
            return Poll::Ready(Err(RecvError::Closed));
        }
        let stale = inner
            .rx_waker
            .as_ref()
            .map_or(true, |w| !w.will_wake(cx.waker()));
        if stale {
            inner.rx_waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.receiver_alive = false;
        inner.rx_waker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::types::CancelReason;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn send_then_receive() {
        init_test("send_then_receive");
        let (tx, rx) = channel::<i32>();
        tx.send(42).unwrap();
        let value = block_on(rx);
        crate::assert_with_log!(value == Ok(42), "received value", Ok::<i32, RecvError>(42), value);
        crate::test_complete!("send_then_receive");
    }

    #[test]
    fn receive_from_other_thread() {
        init_test("receive_from_other_thread");
        let (tx, rx) = channel::<&'static str>();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            tx.send("done").unwrap();
        });
        assert_eq!(block_on(rx), Ok("done"));
        handle.join().unwrap();
        crate::test_complete!("receive_from_other_thread");
    }

    #[test]
    fn dropped_sender_closes() {
        init_test("dropped_sender_closes");
        let (tx, mut rx) = channel::<i32>();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        drop(tx);
        assert!(rx.is_closed());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(block_on(rx), Err(RecvError::Closed));
        crate::test_complete!("dropped_sender_closes");
    }

    #[test]
    fn send_to_dropped_receiver_returns_value() {
        init_test("send_to_dropped_receiver_returns_value");
        let (tx, rx) = channel::<String>();
        drop(rx);
        assert!(tx.is_closed());
        let err = tx.send("lost".to_string()).unwrap_err();
        assert_eq!(err.into_inner(), "lost");
        crate::test_complete!("send_to_dropped_receiver_returns_value");
    }

    #[test]
    fn value_is_taken_once() {
        init_test("value_is_taken_once");
        let (tx, mut rx) = channel::<u8>();
        tx.send(1).unwrap();
        assert!(rx.is_ready());
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        crate::test_complete!("value_is_taken_once");
    }

    #[test]
    fn recv_observes_cancellation() {
        init_test("recv_observes_cancellation");
        let cx = Cx::for_testing();
        let (_tx, mut rx) = channel::<u8>();
        cx.cancel(CancelReason::user("stop waiting"));
        let result = block_on(rx.recv(&cx));
        assert_eq!(result, Err(RecvError::Cancelled));
        crate::test_complete!("recv_observes_cancellation");
    }
}
