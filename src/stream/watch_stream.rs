//! Async sequence over a published value.

use crate::cancel::Cancelled;
use crate::channel::watch;
use crate::cx::Cx;
use crate::stream::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream yielding the current value of a watch channel and then every
/// subsequent change.
///
/// Intermediate values published between two polls are coalesced: the
/// consumer sees the latest one. The stream ends when the sender is dropped
/// or when the `Cx` it was created with is cancelled.
pub struct WatchStream<T> {
    inner: watch::Receiver<T>,
    cancelled: Cancelled,
    has_seen_initial: bool,
    done: bool,
}

impl<T: Clone> WatchStream<T> {
    /// Creates a stream starting with the current value.
    #[must_use]
    pub fn new(cx: &Cx, recv: watch::Receiver<T>) -> Self {
        Self {
            inner: recv,
            cancelled: cx.cancel_token().cancelled(),
            has_seen_initial: false,
            done: false,
        }
    }

    /// Creates a stream that only yields values published after this call.
    #[must_use]
    pub fn from_changes(cx: &Cx, mut recv: watch::Receiver<T>) -> Self {
        recv.mark_seen();
        let mut stream = Self::new(cx, recv);
        stream.has_seen_initial = true;
        stream
    }
}

impl<T: Clone> Stream for WatchStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if Pin::new(&mut this.cancelled).poll(context).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }

        if !this.has_seen_initial {
            this.has_seen_initial = true;
            return Poll::Ready(Some(T::clone(&this.inner.borrow_and_update())));
        }

        match this.inner.poll_changed(context) {
            Poll::Ready(Ok(())) => Poll::Ready(Some(T::clone(&this.inner.borrow()))),
            Poll::Ready(Err(_)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for WatchStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("seen_version", &self.inner.seen_version())
            .field("has_seen_initial", &self.has_seen_initial)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::stream::StreamExt;
    use crate::types::CancelReason;

    #[test]
    fn yields_initial_then_changes() {
        let cx = Cx::for_testing();
        let (tx, rx) = watch::channel(1);
        let mut stream = WatchStream::new(&cx, rx);

        assert_eq!(block_on(stream.next()), Some(1));
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(block_on(stream.next()), Some(3));
        drop(tx);
        assert_eq!(block_on(stream.next()), None);
    }

    #[test]
    fn from_changes_skips_current_value() {
        let cx = Cx::for_testing();
        let (tx, rx) = watch::channel("initial");
        let mut stream = WatchStream::from_changes(&cx, rx);
        tx.send("next").unwrap();
        assert_eq!(block_on(stream.next()), Some("next"));
    }

    #[test]
    fn ends_when_cx_cancelled() {
        let cx = Cx::for_testing();
        let (tx, rx) = watch::channel(0u8);
        let mut stream = WatchStream::new(&cx, rx);
        assert_eq!(block_on(stream.next()), Some(0));

        cx.cancel(CancelReason::user("stop"));
        tx.send(1).unwrap();
        assert_eq!(block_on(stream.next()), None);
        assert_eq!(block_on(stream.next()), None);
    }
}
