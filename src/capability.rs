//! Seams to the outside world.
//!
//! The crate does not talk to the network or draw anything. Work that
//! reaches out goes through a [`FetchCapability`] the host supplies, and
//! results that must be shown go to a [`PresentationSink`].
//!
//! - [`fetch_all`] fans requests out to a fetcher.
//! - [`present`] runs one operation and hands its single terminal outcome to
//!   a sink, including when the operation is cancelled or panics.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use crate::combinator::FanOut;
use crate::cx::Cx;
use crate::error::Error;
use crate::tracing_compat::trace;
use crate::types::{CancelReason, PanicPayload};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that turns a request into bytes.
///
/// Implementations are opaque to the crate: an HTTP client, a disk cache,
/// a test double. `fetch` should observe `cx` and stop early when it is
/// cancelled.
pub trait FetchCapability<R>: Send + Sync {
    /// Starts fetching `request`.
    fn fetch(&self, cx: &Cx, request: R) -> BoxFuture<'static, Result<Vec<u8>, Error>>;
}

impl<R, F> FetchCapability<R> for Arc<F>
where
    F: FetchCapability<R> + ?Sized,
{
    fn fetch(&self, cx: &Cx, request: R) -> BoxFuture<'static, Result<Vec<u8>, Error>> {
        (**self).fetch(cx, request)
    }
}

/// Fetches every request as a child task of `cx` under `fan_out`'s policy.
///
/// # Errors
///
/// As [`FanOut::run`].
pub async fn fetch_all<R, F>(
    cx: &Cx,
    fetcher: Arc<F>,
    requests: Vec<R>,
    fan_out: FanOut,
) -> Result<Vec<Vec<u8>>, Error>
where
    F: FetchCapability<R> + ?Sized,
    R: Send + 'static,
{
    fan_out
        .run(cx, requests, |child, request| fetcher.fetch(&child, request))
        .await
}

/// Receives the final result of a logical operation.
///
/// A sink gets exactly one call per operation: a value, an error, or a
/// cancellation error.
pub trait PresentationSink<T>: Send + Sync {
    /// Hands over the terminal result.
    fn deliver(&self, result: Result<T, Error>);
}

impl<T, S> PresentationSink<T> for Arc<S>
where
    S: PresentationSink<T> + ?Sized,
{
    fn deliver(&self, result: Result<T, Error>) {
        (**self).deliver(result);
    }
}

/// Runs `fut` under `cx` and delivers its outcome to `sink` exactly once.
///
/// - value or error from `fut`: delivered as is
/// - `cx` cancelled: `ErrorKind::Cancelled`
/// - `fut` panicked: `ErrorKind::ChildPanicked`
/// - this future dropped before completion: `ErrorKind::Cancelled`
pub async fn present<T, S, F>(cx: &Cx, sink: &S, fut: F)
where
    S: PresentationSink<T> + ?Sized,
    F: Future<Output = Result<T, Error>>,
{
    let mut once = DeliverOnce {
        cx,
        sink: Some(sink),
        _result: PhantomData,
    };
    let mut fut = std::pin::pin!(fut);
    let guarded = std::future::poll_fn(|task_cx| {
        match catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(task_cx))) {
            Ok(Poll::Ready(result)) => Poll::Ready(result),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(Error::child_panicked(&PanicPayload::from_panic(
                &*payload,
            )))),
        }
    });
    let result = cx.run_cancellable(guarded).await.and_then(|r| r);
    trace!(task_id = %cx.task_id(), ok = result.is_ok(), "presenting result");
    once.deliver(result);
}

/// Delivers a cancellation if `present` is dropped before it delivered.
struct DeliverOnce<'a, T, S: PresentationSink<T> + ?Sized> {
    cx: &'a Cx,
    sink: Option<&'a S>,
    _result: PhantomData<fn(T)>,
}

impl<T, S: PresentationSink<T> + ?Sized> DeliverOnce<'_, T, S> {
    fn deliver(&mut self, result: Result<T, Error>) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(result);
        }
    }
}

impl<T, S: PresentationSink<T> + ?Sized> Drop for DeliverOnce<'_, T, S> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            trace!(task_id = %self.cx.task_id(), "present dropped before completion");
            let reason = self
                .cx
                .cancel_reason()
                .unwrap_or_else(CancelReason::scope_ended);
            self.deliver(Err(Error::cancelled(&reason).with_task(self.cx.task_id())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::block_on;
    use crate::test_utils::{init_test_logging, run_test, TestError};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct ScriptedFetcher;

    impl FetchCapability<(&'static str, u64)> for ScriptedFetcher {
        fn fetch(
            &self,
            cx: &Cx,
            (body, delay): (&'static str, u64),
        ) -> BoxFuture<'static, Result<Vec<u8>, Error>> {
            let cx = cx.clone();
            Box::pin(async move {
                cx.sleep(Duration::from_millis(delay)).await?;
                if body.is_empty() {
                    return Err(Error::upstream(TestError("empty body")));
                }
                Ok(body.as_bytes().to_vec())
            })
        }
    }

    struct NoopWaker;

    impl std::task::Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Result<u32, ErrorKind>>>,
    }

    impl PresentationSink<u32> for RecordingSink {
        fn deliver(&self, result: Result<u32, Error>) {
            self.delivered.lock().push(result.map_err(|e| e.kind()));
        }
    }

    #[test]
    fn fetch_all_keeps_submission_order() {
        init_test_logging();
        run_test(|cx| async move {
            let pages = fetch_all(
                &cx,
                Arc::new(ScriptedFetcher),
                vec![("a", 20), ("b", 1), ("c", 10)],
                FanOut::all_succeed(),
            )
            .await
            .expect("fetch");
            assert_eq!(pages, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        });
    }

    #[test]
    fn fetch_all_best_effort_skips_failures() {
        run_test(|cx| async move {
            let fetcher: Arc<dyn FetchCapability<(&'static str, u64)>> = Arc::new(ScriptedFetcher);
            let pages = fetch_all(
                &cx,
                fetcher,
                vec![("a", 1), ("", 1), ("c", 1)],
                FanOut::best_effort().max_concurrency(1),
            )
            .await
            .expect("fetch");
            assert_eq!(pages, vec![b"a".to_vec(), b"c".to_vec()]);
        });
    }

    #[test]
    fn present_delivers_value_once() {
        let cx = Cx::for_testing();
        let sink = RecordingSink::default();
        block_on(present(&cx, &sink, async { Ok(7u32) }));
        assert_eq!(*sink.delivered.lock(), vec![Ok(7)]);
    }

    #[test]
    fn present_delivers_cancellation() {
        let cx = Cx::for_testing();
        cx.cancel(CancelReason::user("dismissed"));
        let sink = RecordingSink::default();
        block_on(present(&cx, &sink, async { Ok(7u32) }));
        assert_eq!(*sink.delivered.lock(), vec![Err(ErrorKind::Cancelled)]);
    }

    #[test]
    fn present_delivers_panic_as_error() {
        let cx = Cx::for_testing();
        let sink = RecordingSink::default();
        block_on(present(&cx, &sink, async {
            if true {
                panic!("layout exploded");
            }
            Ok(1u32)
        }));
        assert_eq!(*sink.delivered.lock(), vec![Err(ErrorKind::ChildPanicked)]);
    }

    #[test]
    fn dropped_present_delivers_cancellation() {
        let cx = Cx::for_testing();
        let sink = RecordingSink::default();
        let pending = present(&cx, &sink, std::future::pending::<Result<u32, Error>>());
        let mut pending = Box::pin(pending);
        let waker = std::task::Waker::from(Arc::new(NoopWaker));
        let mut task_cx = std::task::Context::from_waker(&waker);
        assert!(pending.as_mut().poll(&mut task_cx).is_pending());
        drop(pending);
        assert_eq!(*sink.delivered.lock(), vec![Err(ErrorKind::Cancelled)]);
    }

    #[test]
    fn present_through_arc_sink() {
        let cx = Cx::for_testing();
        let sink = Arc::new(RecordingSink::default());
        block_on(present(&cx, &sink, async {
            Err::<u32, _>(Error::upstream(TestError("offline")))
        }));
        assert_eq!(*sink.delivered.lock(), vec![Err(ErrorKind::Upstream)]);
    }
}
