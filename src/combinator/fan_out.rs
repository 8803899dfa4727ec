//! Bounded parallel fan-out over homogeneous children.
//!
//! A [`FanOut`] schedules one child task per input against the shared
//! worker pool, inside a group scope that is a child of the caller's `Cx`,
//! and gathers the results.
//!
//! # Policies
//!
//! | Policy          | On child failure                                   | Returns                      |
//! |-----------------|----------------------------------------------------|------------------------------|
//! | `all_succeed()` | cancel every sibling (running and not yet started) | first failure, or all values |
//! | `best_effort()` | log at debug level, keep going                     | successes only               |
//! | `settle()`      | keep going                                         | every child's [`Outcome`]    |
//!
//! The gather order is explicit: [`CollectOrder::Submission`] (default) or
//! [`CollectOrder::Completion`].
//!
//! # Cancellation
//!
//! Cancellation flows top-down only. Cancelling the caller cancels the group
//! and every child, starts nothing further and returns
//! `ErrorKind::Cancelled`. A child failing never cancels the caller's scope.
//! In every case the coordinator waits for started children to reach a
//! terminal state before it returns.
//!
//! # Example
//!
//! ```ignore
//! let pages = FanOut::all_succeed()
//!     .max_concurrency(4)
//!     .run(&cx, urls, |cx, url| async move { fetch(&cx, url).await })
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::{JoinError, TaskHandle};
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, Outcome};

/// What a failed child does to the rest of the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanOutPolicy {
    /// The first failure cancels all siblings and is returned.
    AllSucceed,
    /// Failures are dropped; successes are returned.
    BestEffort,
}

/// Order in which gathered results are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollectOrder {
    /// The order inputs were submitted in.
    #[default]
    Submission,
    /// The order children finished in.
    Completion,
}

/// Coordinator for one fan-out call.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    policy: FanOutPolicy,
    order: CollectOrder,
    max_concurrency: Option<usize>,
    label: &'static str,
}

impl FanOut {
    /// Waits for all children; the first failure cancels the rest.
    #[must_use]
    pub const fn all_succeed() -> Self {
        Self::with_policy(FanOutPolicy::AllSucceed)
    }

    /// Waits for all children and keeps only the successes.
    #[must_use]
    pub const fn best_effort() -> Self {
        Self::with_policy(FanOutPolicy::BestEffort)
    }

    /// Creates a coordinator with an explicit policy.
    #[must_use]
    pub const fn with_policy(policy: FanOutPolicy) -> Self {
        Self {
            policy,
            order: CollectOrder::Submission,
            max_concurrency: None,
            label: "fan-out",
        }
    }

    /// Sets the gather order.
    #[must_use]
    pub const fn order(mut self, order: CollectOrder) -> Self {
        self.order = order;
        self
    }

    /// Bounds how many children run at once; the rest start as slots free.
    /// Zero is treated as one.
    #[must_use]
    pub const fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(if limit == 0 { 1 } else { limit });
        self
    }

    /// Names the fan-out in log fields.
    #[must_use]
    pub const fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Runs `f` once per input as child tasks and gathers the values.
    ///
    /// With no inputs this returns an empty vector without scheduling
    /// anything.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::Cancelled` if `cx` was cancelled before or during.
    /// - `ErrorKind::NoRuntime` if `cx` has no runtime.
    /// - Under `all_succeed`, the first child failure (a child that panicked
    ///   surfaces as `ErrorKind::ChildPanicked`).
    pub async fn run<I, T, F, Fut>(&self, cx: &Cx, inputs: I, f: F) -> Result<Vec<T>, Error>
    where
        I: IntoIterator,
        F: FnMut(Cx, I::Item) -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let gathered = self
            .gather(cx, inputs, f, self.policy == FanOutPolicy::AllSucceed)
            .await?;
        let mut values = Vec::with_capacity(gathered.len());
        for (index, outcome) in gathered {
            match outcome {
                Outcome::Ok(value) => values.push(value),
                failed => {
                    debug!(
                        fan_out = self.label,
                        index,
                        outcome = %describe(&failed),
                        "child failed; result dropped"
                    );
                }
            }
        }
        Ok(values)
    }

    /// Runs `f` once per input and returns every child's outcome in
    /// submission order. A failing child never cancels its siblings.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` if `cx` was cancelled, `ErrorKind::NoRuntime`
    /// if it has no runtime.
    pub async fn settle<I, T, F, Fut>(
        &self,
        cx: &Cx,
        inputs: I,
        f: F,
    ) -> Result<Vec<Outcome<T, Error>>, Error>
    where
        I: IntoIterator,
        F: FnMut(Cx, I::Item) -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let settled = Self {
            order: CollectOrder::Submission,
            ..*self
        };
        let gathered = settled.gather(cx, inputs, f, false).await?;
        Ok(gathered.into_iter().map(|(_, outcome)| outcome).collect())
    }

    async fn gather<I, T, F, Fut>(
        &self,
        cx: &Cx,
        inputs: I,
        mut f: F,
        fail_fast: bool,
    ) -> Result<Vec<(usize, Outcome<T, Error>)>, Error>
    where
        I: IntoIterator,
        F: FnMut(Cx, I::Item) -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        cx.checkpoint()?;
        let mut pending: VecDeque<(usize, I::Item)> = inputs.into_iter().enumerate().collect();
        let total = pending.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        cx.require_runtime()?;

        let limit = self.max_concurrency.unwrap_or(usize::MAX);
        let group = cx.child();
        debug!(
            fan_out = self.label,
            children = total,
            policy = ?self.policy,
            "fan-out started"
        );

        let mut running: Vec<(usize, TaskHandle<Result<T, Error>>)> = Vec::new();
        let mut finished: Vec<(usize, Outcome<T, Error>)> = Vec::with_capacity(total);
        let mut failure: Option<Error> = None;

        loop {
            while failure.is_none() && running.len() < limit {
                let Some((index, input)) = pending.pop_front() else {
                    break;
                };
                match group.spawn(|child| f(child, input)) {
                    Ok(handle) => {
                        trace!(fan_out = self.label, index, task_id = %handle.id(), "child started");
                        running.push((index, handle));
                    }
                    Err(err) => {
                        group.cancel(CancelReason::sibling_failed());
                        failure = Some(err);
                    }
                }
            }
            if running.is_empty() {
                break;
            }

            let (position, joined) = match next_completion(cx, &mut running).await {
                Ok(done) => done,
                Err(cancelled) => {
                    group.cancel(CancelReason::parent_cancelled());
                    debug!(
                        fan_out = self.label,
                        in_flight = running.len(),
                        not_started = pending.len(),
                        "fan-out cancelled"
                    );
                    drain(running).await;
                    return Err(cancelled);
                }
            };
            let (index, _) = running.swap_remove(position);
            let outcome = child_outcome(joined);

            if fail_fast && !outcome.is_ok() {
                if failure.is_none() {
                    debug!(
                        fan_out = self.label,
                        index,
                        outcome = %describe(&outcome),
                        "child failed; cancelling siblings"
                    );
                    group.cancel(CancelReason::sibling_failed());
                    failure = Some(into_error(outcome));
                } else {
                    trace!(fan_out = self.label, index, "later failure suppressed");
                }
                continue;
            }
            finished.push((index, outcome));
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if self.order == CollectOrder::Submission {
            finished.sort_by_key(|(index, _)| *index);
        }
        debug!(fan_out = self.label, children = total, "fan-out finished");
        Ok(finished)
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::all_succeed()
    }
}

/// Waits for any running child, or for `cx` to be cancelled.
async fn next_completion<T>(
    cx: &Cx,
    running: &mut [(usize, TaskHandle<T>)],
) -> Result<(usize, Result<T, JoinError>), Error> {
    cx.run_cancellable(std::future::poll_fn(|task_cx| {
        for (position, (_, handle)) in running.iter_mut().enumerate() {
            if let Poll::Ready(joined) = Pin::new(handle).poll(task_cx) {
                return Poll::Ready((position, joined));
            }
        }
        Poll::Pending
    }))
    .await
}

/// Waits for already cancelled children to reach a terminal state.
async fn drain<T>(running: Vec<(usize, TaskHandle<T>)>) {
    for (_, handle) in running {
        let _ = handle.await;
    }
}

/// Folds a joined child into the four-valued outcome.
pub(crate) fn child_outcome<T>(joined: Result<Result<T, Error>, JoinError>) -> Outcome<T, Error> {
    match joined {
        Ok(Ok(value)) => Outcome::Ok(value),
        Ok(Err(err)) if err.is_cancelled() => {
            Outcome::Cancelled(err.cancel_reason().cloned().unwrap_or_default())
        }
        Ok(Err(err)) => Outcome::Err(err),
        Err(JoinError::Cancelled(reason)) => Outcome::Cancelled(reason),
        Err(JoinError::Panicked(payload)) => Outcome::Panicked(payload),
    }
}

/// Converts a non-`Ok` outcome into the error reported to the caller.
pub(crate) fn into_error<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Ok(_) => Error::internal("successful outcome reported as failure"),
        Outcome::Err(err) => err,
        Outcome::Cancelled(reason) => Error::cancelled(&reason),
        Outcome::Panicked(payload) => Error::child_panicked(&payload),
    }
}

fn describe<T>(outcome: &Outcome<T, Error>) -> Described<'_, T> {
    Described(outcome)
}

struct Described<'a, T>(&'a Outcome<T, Error>);

impl<T> fmt::Display for Described<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Outcome::Ok(_) => f.write_str("ok"),
            Outcome::Err(err) => write!(f, "error: {err}"),
            Outcome::Cancelled(reason) => write!(f, "cancelled: {reason}"),
            Outcome::Panicked(payload) => write!(f, "{payload}"),
        }
    }
}
