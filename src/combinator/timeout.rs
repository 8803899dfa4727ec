//! Deadline for a single operation.
//!
//! A timeout is a race between the operation and a timer. When the timer
//! wins, the operation's future is dropped and the caller sees a
//! cancellation whose reason is [`CancelKind::Timeout`](crate::types::CancelKind::Timeout),
//! so `err.is_timeout()` tells it apart from other cancellations.
//!
//! To put a deadline on a spawned task instead, use
//! [`TaskHandle::cancel_after`](crate::runtime::TaskHandle::cancel_after).

use std::future::Future;
use std::time::{Duration, Instant};

use crate::cx::Cx;
use crate::error::Error;
use crate::tracing_compat::trace;
use crate::types::CancelReason;

/// Runs `fut` for at most `duration`.
///
/// # Errors
///
/// `ErrorKind::Cancelled` with a timeout reason if the deadline passed
/// first, or with the scope's reason if `cx` was cancelled.
pub async fn timeout<F: Future>(cx: &Cx, duration: Duration, fut: F) -> Result<F::Output, Error> {
    match cx.run_cancellable(crate::time::timeout(duration, fut)).await? {
        Ok(value) => Ok(value),
        Err(_elapsed) => Err(timed_out(cx, duration)),
    }
}

/// Runs `fut` until `deadline` at the latest.
///
/// # Errors
///
/// As [`timeout`].
pub async fn timeout_at<F: Future>(cx: &Cx, deadline: Instant, fut: F) -> Result<F::Output, Error> {
    let budget = deadline.saturating_duration_since(Instant::now());
    match cx.run_cancellable(crate::time::timeout_at(deadline, fut)).await? {
        Ok(value) => Ok(value),
        Err(_elapsed) => Err(timed_out(cx, budget)),
    }
}

fn timed_out(cx: &Cx, budget: Duration) -> Error {
    trace!(
        task_id = %cx.task_id(),
        budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        "operation timed out"
    );
    Error::cancelled(&CancelReason::timeout()).with_task(cx.task_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::test_utils::init_test_logging;

    #[test]
    fn completes_before_deadline() {
        init_test_logging();
        let cx = Cx::for_testing();
        let value = block_on(timeout(&cx, Duration::from_secs(5), async { 3 })).expect("in time");
        assert_eq!(value, 3);
    }

    #[test]
    fn deadline_reports_timeout() {
        init_test_logging();
        let cx = Cx::for_testing();
        let err = block_on(timeout(
            &cx,
            Duration::from_millis(10),
            crate::time::sleep(Duration::from_secs(30)),
        ))
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.is_timeout());
        assert_eq!(err.task_id(), Some(cx.task_id()));
    }

    #[test]
    fn past_deadline_still_polls_ready_future_once() {
        let cx = Cx::for_testing();
        let deadline = Instant::now();
        let value = block_on(timeout_at(&cx, deadline, async { "ready" })).expect("inner first");
        assert_eq!(value, "ready");
    }

    #[test]
    fn scope_cancellation_is_not_a_timeout() {
        let cx = Cx::for_testing();
        cx.cancel(CancelReason::user("stop"));
        let err = block_on(timeout(&cx, Duration::from_secs(1), async {})).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }
}
