//! State confined to one dedicated thread.
//!
//! A [`ConfinedContext`] owns a value on a thread of its own, the way a UI
//! toolkit owns its widgets on the main thread. Other code never touches the
//! value directly; it sends closures that run there, in submission order.
//! The state is created on that thread, so it does not need to be `Send`.
//!
//! - [`run`](ConfinedContext::run) awaits the closure's result.
//! - [`post`](ConfinedContext::post) is fire-and-forget.
//! - [`sink`](ConfinedContext::sink) turns the context into a
//!   [`PresentationSink`] so final results of an operation land on the
//!   confined thread.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crate::capability::PresentationSink;
use crate::channel::oneshot;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind};
use crate::tracing_compat::{debug, warn};
use crate::types::PanicPayload;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;
type PanicResult<R> = Result<R, Box<dyn Any + Send>>;

/// Handle to state owned by a dedicated thread.
///
/// Cloning is cheap; the thread stops and the state is dropped when the last
/// clone is dropped.
pub struct ConfinedContext<S> {
    inner: Arc<ConfinedInner<S>>,
}

struct ConfinedInner<S> {
    name: String,
    sender: Option<mpsc::Sender<Job<S>>>,
    thread_id: ThreadId,
    thread: Option<JoinHandle<()>>,
}

impl<S: 'static> ConfinedContext<S> {
    /// Starts a thread named `name` and creates the state on it with `init`.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Internal` if the thread cannot be spawned.
    pub fn spawn<F>(name: impl Into<String>, init: F) -> Result<Self, Error>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job<S>>();
        let label = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = init();
                debug!(context = %label, "confined thread started");
                while let Ok(job) = receiver.recv() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(&mut state))) {
                        let payload = PanicPayload::from_panic(&*payload);
                        warn!(context = %label, panic = %payload, "confined job panicked");
                    }
                }
                debug!(context = %label, "confined thread stopped");
            })
            .map_err(|err| {
                Error::internal(format!("failed to spawn confined thread `{name}`")).with_source(err)
            })?;

        Ok(Self {
            inner: Arc::new(ConfinedInner {
                name,
                sender: Some(sender),
                thread_id: thread.thread().id(),
                thread: Some(thread),
            }),
        })
    }

    /// Runs `op` on the confined thread and waits for its result.
    ///
    /// If `cx` is cancelled while waiting the result is discarded; an
    /// operation already queued still runs.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Cancelled` if `cx` is cancelled.
    /// - `ErrorKind::ChildPanicked` if `op` panicked.
    /// - `ErrorKind::ChannelClosed` if the confined thread is gone.
    /// - `ErrorKind::ProtocolViolation` when called from the confined thread
    ///   itself, which would wait on its own queue.
    pub async fn run<R, F>(&self, cx: &Cx, op: F) -> Result<R, Error>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        cx.checkpoint()?;
        if self.is_current() {
            return Err(Error::protocol_violation(format!(
                "run awaited on confined thread `{}`",
                self.inner.name
            )));
        }

        let (tx, mut rx) = oneshot::channel::<PanicResult<R>>();
        self.post(move |state| {
            let result = catch_unwind(AssertUnwindSafe(|| op(state)));
            let _ = tx.send(result);
        })?;

        match rx.recv(cx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(Error::child_panicked(&PanicPayload::from_panic(&*payload))),
            Err(oneshot::RecvError::Cancelled) => {
                let reason = cx.cancel_reason().unwrap_or_default();
                Err(Error::cancelled(&reason).with_task(cx.task_id()))
            }
            Err(oneshot::RecvError::Closed) => Err(self.closed()),
        }
    }

    /// Queues `op` to run on the confined thread without waiting.
    ///
    /// # Errors
    ///
    /// `ErrorKind::ChannelClosed` if the confined thread is gone.
    pub fn post<F>(&self, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let sender = self.inner.sender.as_ref().ok_or_else(|| self.closed())?;
        sender.send(Box::new(op)).map_err(|_| self.closed())
    }

    /// Returns a sink that applies every delivered result on the confined
    /// thread.
    pub fn sink<T, F>(&self, apply: F) -> ConfinedSink<S, T>
    where
        T: Send + 'static,
        F: Fn(&mut S, Result<T, Error>) + Send + Sync + 'static,
    {
        ConfinedSink {
            context: self.clone(),
            apply: Arc::new(apply),
        }
    }
}

impl<S> ConfinedContext<S> {
    /// Returns true when called from the confined thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Returns the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn closed(&self) -> Error {
        Error::new(ErrorKind::ChannelClosed)
            .with_message(format!("confined context `{}` stopped", self.inner.name))
    }
}

impl<S> Clone for ConfinedContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for ConfinedContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfinedContext")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}

impl<S> Drop for ConfinedInner<S> {
    fn drop(&mut self) {
        // Closing the queue ends the thread loop once queued jobs ran.
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            if std::thread::current().id() != self.thread_id && thread.join().is_err() {
                warn!(context = %self.name, "confined thread panicked during teardown");
            }
        }
    }
}

/// [`PresentationSink`] that applies results on a confined thread.
pub struct ConfinedSink<S, T> {
    context: ConfinedContext<S>,
    apply: Arc<dyn Fn(&mut S, Result<T, Error>) + Send + Sync>,
}

impl<S: 'static, T: Send + 'static> PresentationSink<T> for ConfinedSink<S, T> {
    fn deliver(&self, result: Result<T, Error>) {
        let apply = Arc::clone(&self.apply);
        if let Err(err) = self.context.post(move |state| apply(state, result)) {
            warn!(context = %self.context.name(), error = %err, "result dropped");
        }
    }
}

impl<S, T> Clone for ConfinedSink<S, T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<S, T> fmt::Debug for ConfinedSink<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfinedSink")
            .field("context", &self.context.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelReason;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn run_executes_on_confined_thread() {
        init_test_logging();
        let cx = Cx::for_testing();
        let ui = ConfinedContext::spawn("ui-main", Vec::<String>::new).expect("spawn");
        assert!(!ui.is_current());

        let thread_name = block_on(ui.run(&cx, |labels| {
            labels.push("loaded".into());
            std::thread::current().name().map(str::to_owned)
        }))
        .expect("run");
        assert_eq!(thread_name.as_deref(), Some("ui-main"));

        let same = ui.clone();
        let inside = block_on(ui.run(&cx, move |_| same.is_current())).expect("run");
        assert!(inside);
    }

    #[test]
    fn state_need_not_be_send() {
        let cx = Cx::for_testing();
        let ui = ConfinedContext::spawn("ui-rc", || Rc::new(RefCell::new(0))).expect("spawn");
        ui.post(|counter| *counter.borrow_mut() += 2).expect("post");
        let value = block_on(ui.run(&cx, |counter| *counter.borrow())).expect("run");
        assert_eq!(value, 2);
    }

    #[test]
    fn panicking_job_reports_and_thread_survives() {
        let cx = Cx::for_testing();
        let ui = ConfinedContext::spawn("ui-panic", || 1u8).expect("spawn");
        let err = block_on(ui.run(&cx, |_| -> u8 { panic!("render failed") })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChildPanicked);
        assert_eq!(err.message(), Some("render failed"));
        assert_eq!(block_on(ui.run(&cx, |n| *n)).expect("still alive"), 1);
    }

    #[test]
    fn cancelled_caller_is_rejected() {
        let cx = Cx::for_testing();
        cx.cancel(CancelReason::user("view closed"));
        let ui = ConfinedContext::spawn("ui-cancel", || ()).expect("spawn");
        assert!(block_on(ui.run(&cx, |()| ())).unwrap_err().is_cancelled());
    }

    #[test]
    fn sink_applies_results_in_order() {
        let cx = Cx::for_testing();
        let ui = ConfinedContext::spawn("ui-sink", Vec::<String>::new).expect("spawn");
        let sink = ui.sink(|shown: &mut Vec<String>, result: Result<u32, Error>| {
            shown.push(match result {
                Ok(n) => format!("value {n}"),
                Err(err) => format!("error {}", err.kind()),
            });
        });
        sink.deliver(Ok(3));
        sink.deliver(Err(Error::new(ErrorKind::ChannelClosed)));

        let shown = block_on(ui.run(&cx, |shown| shown.clone())).expect("run");
        assert_eq!(shown, vec!["value 3", "error channel closed"]);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn dropping_last_handle_stops_thread() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dropped);
        let ui = ConfinedContext::spawn("ui-drop", move || DropFlag(flag)).expect("spawn");
        let copy = ui.clone();
        drop(ui);
        assert!(!dropped.load(Ordering::SeqCst));
        drop(copy);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
