//! Sleep future for delaying execution.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::driver;

/// A future that completes once its deadline has passed.
///
/// `Sleep` is not cancel-aware by itself; use
/// [`Cx::sleep`](crate::Cx::sleep) to wake early on cancellation.
///
/// # Cancel Safety
///
/// Dropping a `Sleep` removes its timer entry; no other side effects.
///
/// ```ignore
/// use taskweave::time::sleep;
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(100)).await;
/// ```
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    /// `None` when the deadline overflowed `Instant`: never completes.
    deadline: Option<Instant>,
    key: Option<u64>,
}

/// Sleeps for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline: Instant::now().checked_add(duration),
        key: None,
    }
}

/// Sleeps until `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline: Some(deadline),
        key: None,
    }
}

impl Sleep {
    /// Returns the deadline, or `None` for a sleep that never ends.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Moves the deadline. The next poll re-registers the timer.
    pub fn reset(&mut self, deadline: Instant) {
        self.clear();
        self.deadline = Some(deadline);
    }

    fn clear(&mut self) {
        if let Some(key) = self.key.take() {
            driver::global().cancel(key);
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(deadline) = this.deadline else {
            return Poll::Pending;
        };
        if Instant::now() >= deadline {
            this.clear();
            return Poll::Ready(());
        }

        let driver = driver::global();
        match this.key {
            Some(key) if driver.update(key, cx.waker()) => {}
            _ => {
                this.key = driver.register(deadline, cx.waker());
                if this.key.is_none() {
                    // Degraded driver: poll again soon.
                    cx.waker().wake_by_ref();
                }
            }
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.clear();
    }
}
