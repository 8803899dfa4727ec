//! Cancellable lazy producer.
//!
//! A [`Producer`] is the pull side of a push-driven sequence. The push side
//! is an [`Emitter`] handed to a setup closure the first time the producer
//! is polled:
//!
//! ```text
//!   Idle ──first poll──► Producing ──finish──► Finished
//!                            │      ──fail───► Failed(E)
//!                            └──────cancel───► Cancelled
//! ```
//!
//! Cancellation (explicit, through a [`ProducerCancelHandle`], or by dropping
//! the producer) clears undelivered values and runs every termination handler
//! before `cancel` returns. Nothing is delivered to the consumer after that.
//!
//! # Example
//!
//! ```ignore
//! let producer = Producer::<u32>::new(|emitter| {
//!     for n in 0..3 {
//!         emitter.yield_value(n);
//!     }
//!     emitter.finish();
//! });
//! let items: Vec<_> = producer.collect().await;
//! ```

use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::ViolationResponse;
use crate::stream::{Stream, StreamExt};
use crate::tracing_compat::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

/// How many undelivered values a producer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
    /// Keep everything.
    #[default]
    Unbounded,
    /// Keep the oldest `n` values; new values are dropped while full.
    BufferingOldest(usize),
    /// Keep the newest `n` values; the oldest is evicted while full.
    BufferingNewest(usize),
}

/// Result of [`Emitter::yield_value`].
#[derive(Debug, PartialEq, Eq)]
pub enum YieldResult<T> {
    /// The value was buffered for the consumer.
    Enqueued,
    /// The buffer was full; this value (the new one or an evicted old one)
    /// will never be delivered.
    Dropped(T),
    /// The consumer cancelled; the value was discarded.
    Terminated,
    /// This side already finished or failed; the value was discarded and the
    /// protocol violation reported.
    Violation,
}

/// Lifecycle of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerState {
    /// Not polled yet; setup has not run.
    Idle,
    /// Setup ran; values may still arrive.
    Producing,
    /// The emitter finished the sequence.
    Finished,
    /// The emitter failed the sequence.
    Failed,
    /// The consumer side cancelled.
    Cancelled,
}

impl ProducerState {
    /// Returns true for `Finished`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    const fn termination(self) -> Option<Termination> {
        match self {
            Self::Finished => Some(Termination::Finished),
            Self::Failed => Some(Termination::Failed),
            Self::Cancelled => Some(Termination::Cancelled),
            Self::Idle | Self::Producing => None,
        }
    }
}

/// Why a producer terminated; passed to termination handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Finished by the emitter.
    Finished,
    /// Failed by the emitter.
    Failed,
    /// Cancelled by the consumer.
    Cancelled,
}

impl Termination {
    const fn state(self) -> ProducerState {
        match self {
            Self::Finished => ProducerState::Finished,
            Self::Failed => ProducerState::Failed,
            Self::Cancelled => ProducerState::Cancelled,
        }
    }
}

type Setup<T, E> = Box<dyn FnOnce(Emitter<T, E>) + Send>;
type Handler = Box<dyn FnOnce(Termination) + Send>;

struct Shared<T, E> {
    state: ProducerState,
    buffer: VecDeque<T>,
    error: Option<E>,
    policy: BufferPolicy,
    response: ViolationResponse,
    consumer: Option<Waker>,
    handlers: Vec<Handler>,
    setup: Option<Setup<T, E>>,
}

struct ProducerInner<T, E> {
    shared: Mutex<Shared<T, E>>,
}

impl<T, E> ProducerInner<T, E> {
    fn state(&self) -> ProducerState {
        self.shared.lock().state
    }

    /// Emitter-side termination. No-op once terminal.
    fn terminate(&self, termination: Termination, error: Option<E>) -> bool {
        let (handlers, waker) = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return false;
            }
            shared.state = termination.state();
            shared.error = error;
            debug!(
                termination = ?termination,
                buffered = shared.buffer.len(),
                "producer terminated"
            );
            (std::mem::take(&mut shared.handlers), shared.consumer.take())
        };
        for handler in handlers {
            handler(termination);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Consumer-side cancellation.
    fn cancel(&self) -> bool {
        let (cancelled, handlers, waker, setup, discarded) = {
            let mut shared = self.shared.lock();
            let discarded = std::mem::take(&mut shared.buffer);
            shared.error = None;
            if shared.state.is_terminal() {
                (false, Vec::new(), shared.consumer.take(), None, discarded)
            } else {
                shared.state = ProducerState::Cancelled;
                debug!(discarded = discarded.len(), "producer cancelled");
                (
                    true,
                    std::mem::take(&mut shared.handlers),
                    shared.consumer.take(),
                    shared.setup.take(),
                    discarded,
                )
            }
        };
        // Values and an unstarted setup may own resources; release them
        // outside the lock.
        drop(setup);
        drop(discarded);
        for handler in handlers {
            handler(Termination::Cancelled);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        cancelled
    }

    fn poll_pull(&self, waker: &Waker) -> Poll<Option<Result<T, E>>> {
        let mut shared = self.shared.lock();
        if let Some(value) = shared.buffer.pop_front() {
            trace!(remaining = shared.buffer.len(), "producer delivered value");
            return Poll::Ready(Some(Ok(value)));
        }
        match shared.state {
            ProducerState::Idle | ProducerState::Producing => {
                match &shared.consumer {
                    Some(existing) if existing.will_wake(waker) => {}
                    _ => shared.consumer = Some(waker.clone()),
                }
                Poll::Pending
            }
            ProducerState::Failed => Poll::Ready(shared.error.take().map(Err)),
            ProducerState::Finished | ProducerState::Cancelled => Poll::Ready(None),
        }
    }
}

/// Object-safe view of a producer used by [`ProducerCancelHandle`].
trait ProducerControl: Send + Sync {
    fn cancel_producer(&self) -> bool;
    fn producer_state(&self) -> ProducerState;
}

impl<T: Send, E: Send> ProducerControl for ProducerInner<T, E> {
    fn cancel_producer(&self) -> bool {
        self.cancel()
    }

    fn producer_state(&self) -> ProducerState {
        self.state()
    }
}

/// Pull side of a cancellable sequence.
///
/// Implements [`Stream`] with `Item = Result<T, E>`: buffered values in
/// order, then one `Err(e)` if the sequence failed, then `None`. Dropping
/// the producer cancels it.
pub struct Producer<T, E = Infallible> {
    inner: Arc<ProducerInner<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> Producer<T, E> {
    /// Creates an idle producer with an unbounded buffer.
    ///
    /// `setup` runs on the first poll and receives the emitter. It may emit
    /// synchronously, or move the emitter into a callback or task.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Emitter<T, E>) + Send + 'static,
    {
        Self::with_policy(BufferPolicy::Unbounded, setup)
    }

    /// Creates an idle producer with the given buffer policy.
    pub fn with_policy<F>(policy: BufferPolicy, setup: F) -> Self
    where
        F: FnOnce(Emitter<T, E>) + Send + 'static,
    {
        Self {
            inner: Arc::new(ProducerInner {
                shared: Mutex::new(Shared {
                    state: ProducerState::Idle,
                    buffer: VecDeque::new(),
                    error: None,
                    policy,
                    response: ViolationResponse::default(),
                    consumer: None,
                    handlers: Vec::new(),
                    setup: Some(Box::new(setup)),
                }),
            }),
        }
    }

    /// Runs the producing loop as a child task of `cx`.
    ///
    /// The task starts on the first poll. Its `Ok(())` finishes the producer
    /// and `Err(e)` fails it. Cancelling the producer cancels the task.
    ///
    /// # Errors
    ///
    /// `ErrorKind::NoRuntime` if `cx` is not attached to a runtime.
    pub fn spawn<F, Fut>(cx: &Cx, f: F) -> Result<Self, Error>
    where
        F: FnOnce(Emitter<T, E>, Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        cx.require_runtime()?;
        let parent = cx.clone();
        let producer = Self::new(move |emitter: Emitter<T, E>| {
            let task_emitter = emitter.clone();
            let spawned = parent.spawn(move |child| async move {
                match f(task_emitter.clone(), child).await {
                    Ok(()) => task_emitter.finish(),
                    Err(err) => task_emitter.fail(err),
                }
            });
            match spawned {
                Ok(handle) => {
                    let task = handle.cancel_handle();
                    emitter.on_termination(move |termination| {
                        if termination == Termination::Cancelled {
                            task.cancel();
                        }
                    });
                }
                Err(err) => warn!(error = %err, "producer task could not be spawned"),
            }
        });
        Ok(producer.violation_response(cx.violation_response()))
    }

    /// Sets how emitting after `Finished`/`Failed` is reported.
    #[must_use]
    pub fn violation_response(self, response: ViolationResponse) -> Self {
        self.inner.shared.lock().response = response;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.inner.state()
    }

    /// Number of values buffered and not yet delivered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.shared.lock().buffer.len()
    }

    /// Cancels the producer.
    ///
    /// Undelivered values are discarded and termination handlers run before
    /// this returns. Returns `true` if this call moved the producer to
    /// `Cancelled`; on an already finished or failed producer only the
    /// buffer is discarded.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Returns a handle that can cancel this producer from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> ProducerCancelHandle {
        let inner: Arc<dyn ProducerControl> = self.inner.clone();
        ProducerCancelHandle {
            inner: Arc::downgrade(&inner),
        }
    }

    fn start(&self) {
        let setup = {
            let mut shared = self.inner.shared.lock();
            if shared.state != ProducerState::Idle {
                return;
            }
            shared.state = ProducerState::Producing;
            shared.setup.take()
        };
        if let Some(setup) = setup {
            debug!("producer started");
            setup(Emitter {
                link: Arc::new(EmitterLink {
                    inner: Arc::clone(&self.inner),
                }),
            });
        }
    }
}

impl<T, E> Producer<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Waits for the next value, or for `cx` to be cancelled.
    ///
    /// Returns `Ok(None)` once the sequence finished or was cancelled.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Upstream` with the producer's error as source if it
    /// failed; `ErrorKind::Cancelled` if `cx` was cancelled, in which case
    /// the producer is cancelled too.
    pub async fn recv(&mut self, cx: &Cx) -> Result<Option<T>, Error> {
        let next = cx.run_cancellable(self.next()).await;
        match next {
            Ok(Some(Ok(value))) => Ok(Some(value)),
            Ok(Some(Err(err))) => Err(Error::upstream(err)),
            Ok(None) => Ok(None),
            Err(err) => {
                self.cancel();
                Err(err)
            }
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Stream for Producer<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.start();
        self.inner.poll_pull(cx.waker())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let shared = self.inner.shared.lock();
        let buffered = shared.buffer.len();
        if shared.state.is_terminal() {
            (buffered, Some(buffered + usize::from(shared.error.is_some())))
        } else {
            (buffered, None)
        }
    }
}

impl<T, E> Drop for Producer<T, E> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<T, E> fmt::Debug for Producer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("Producer")
            .field("state", &shared.state)
            .field("buffered", &shared.buffer.len())
            .field("policy", &shared.policy)
            .finish()
    }
}

/// Cancels a producer without owning it.
#[derive(Clone)]
pub struct ProducerCancelHandle {
    inner: Weak<dyn ProducerControl>,
}

impl ProducerCancelHandle {
    /// Cancels the producer. Returns `false` if it was already terminal or
    /// has been dropped.
    pub fn cancel(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.cancel_producer())
    }

    /// Returns true if the producer is terminal or gone.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |inner| inner.producer_state().is_terminal())
    }
}

impl fmt::Debug for ProducerCancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerCancelHandle")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Finishes the producer when the last emitter clone goes away.
struct EmitterLink<T, E> {
    inner: Arc<ProducerInner<T, E>>,
}

impl<T, E> Drop for EmitterLink<T, E> {
    fn drop(&mut self) {
        if self.inner.terminate(Termination::Finished, None) {
            trace!("last emitter dropped");
        }
    }
}

/// Push side of a [`Producer`].
pub struct Emitter<T, E = Infallible> {
    link: Arc<EmitterLink<T, E>>,
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
        }
    }
}

impl<T, E> Emitter<T, E> {
    fn inner(&self) -> &ProducerInner<T, E> {
        &self.link.inner
    }

    /// Offers a value to the consumer.
    ///
    /// After the consumer cancelled this returns
    /// [`YieldResult::Terminated`]. Emitting after this side finished or
    /// failed is a protocol violation: it is reported per the producer's
    /// [`ViolationResponse`] and returns [`YieldResult::Violation`].
    pub fn yield_value(&self, value: T) -> YieldResult<T> {
        let mut shared = self.inner().shared.lock();
        match shared.state {
            ProducerState::Idle | ProducerState::Producing => {}
            ProducerState::Cancelled => return YieldResult::Terminated,
            ProducerState::Finished | ProducerState::Failed => {
                let response = shared.response;
                drop(shared);
                let err = response.report("value emitted after the producer terminated");
                trace!(error = %err, "emit after termination rejected");
                return YieldResult::Violation;
            }
        }

        let result = match shared.policy {
            BufferPolicy::Unbounded => {
                shared.buffer.push_back(value);
                YieldResult::Enqueued
            }
            BufferPolicy::BufferingOldest(limit) => {
                if shared.buffer.len() >= limit {
                    YieldResult::Dropped(value)
                } else {
                    shared.buffer.push_back(value);
                    YieldResult::Enqueued
                }
            }
            BufferPolicy::BufferingNewest(0) => YieldResult::Dropped(value),
            BufferPolicy::BufferingNewest(limit) => {
                let evicted = if shared.buffer.len() >= limit {
                    shared.buffer.pop_front()
                } else {
                    None
                };
                shared.buffer.push_back(value);
                evicted.map_or(YieldResult::Enqueued, YieldResult::Dropped)
            }
        };
        let waker = shared.consumer.take();
        drop(shared);
        if let Some(waker) = waker {
            waker.wake();
        }
        result
    }

    /// Ends the sequence. No-op once terminal.
    pub fn finish(&self) {
        self.inner().terminate(Termination::Finished, None);
    }

    /// Ends the sequence with `error`, delivered after buffered values.
    /// No-op once terminal.
    pub fn fail(&self, error: E) {
        self.inner().terminate(Termination::Failed, Some(error));
    }

    /// Registers `handler` to run once when the producer terminates.
    ///
    /// On cancellation handlers run synchronously inside `cancel`. If the
    /// producer is already terminal the handler runs immediately.
    pub fn on_termination<F>(&self, handler: F)
    where
        F: FnOnce(Termination) + Send + 'static,
    {
        let mut shared = self.inner().shared.lock();
        match shared.state.termination() {
            Some(termination) => {
                drop(shared);
                handler(termination);
            }
            None => shared.handlers.push(Box::new(handler)),
        }
    }

    /// Returns true once the producer finished, failed or was cancelled.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner().state().is_terminal()
    }
}

impl<T, E> fmt::Debug for Emitter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("state", &self.inner().state())
            .finish()
    }
}
