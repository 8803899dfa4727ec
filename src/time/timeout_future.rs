//! Timeout wrapper for futures.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::elapsed::Elapsed;
use super::sleep::{sleep, sleep_until, Sleep};

/// A future that wraps another future with a deadline.
///
/// Resolves to `Ok(F::Output)` if the inner future completes first and to
/// `Err(Elapsed)` otherwise. The inner future is polled before the deadline
/// is checked, so a future that is ready at the deadline still wins.
///
/// # Cancel Safety
///
/// Dropping it drops the inner future; partial side effects of the inner
/// future stay applied.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct TimeoutFuture<F> {
    future: Pin<Box<F>>,
    sleep: Sleep,
}

/// Limits `future` to `duration`.
pub fn timeout<F: Future>(duration: Duration, future: F) -> TimeoutFuture<F> {
    TimeoutFuture {
        future: Box::pin(future),
        sleep: sleep(duration),
    }
}

/// Limits `future` to complete before `deadline`.
pub fn timeout_at<F: Future>(deadline: Instant, future: F) -> TimeoutFuture<F> {
    TimeoutFuture {
        future: Box::pin(future),
        sleep: sleep_until(deadline),
    }
}

impl<F> TimeoutFuture<F> {
    /// Returns the deadline, or `None` if it overflowed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.deadline()
    }
}

impl<F: Future> Future for TimeoutFuture<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = this.future.as_mut().poll(cx) {
            return Poll::Ready(Ok(value));
        }
        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(()) => {
                let deadline = this.sleep.deadline().unwrap_or_else(Instant::now);
                Poll::Ready(Err(Elapsed::new(deadline)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;

    #[test]
    fn completes_before_deadline() {
        let result = block_on(timeout(Duration::from_secs(5), async { 42 }));
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn elapses_on_pending_future() {
        let start = Instant::now();
        let result = block_on(timeout(
            Duration::from_millis(10),
            std::future::pending::<()>(),
        ));
        let err = result.unwrap_err();
        assert!(err.deadline() >= start + Duration::from_millis(10));
    }

    #[test]
    fn ready_future_wins_past_deadline() {
        let result = block_on(timeout_at(Instant::now(), async { "done" }));
        assert_eq!(result, Ok("done"));
    }
}
