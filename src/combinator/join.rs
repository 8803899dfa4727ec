//! Fixed-arity structured concurrency.
//!
//! `join2(cx, a, b)` starts `a` and `b` as child tasks of a group scope
//! under `cx` and waits for both. Results come back as a tuple.
//!
//! # Semantics
//!
//! 1. Both children are spawned before either is awaited.
//! 2. The first child to fail cancels the group with a fail-fast reason and
//!    its error is returned.
//! 3. Cancelling `cx` cancels both children.
//! 4. In every case both children reach a terminal state before `join2`
//!    returns. Nothing outlives the call.
//!
//! `join3` nests `join2` and flattens the tuple.
//!
//! For a variable number of homogeneous children use
//! [`FanOut`](super::FanOut).

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use super::fan_out::{child_outcome, into_error};
use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::{JoinError, TaskHandle};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Outcome};

type Joined<T> = Result<Result<T, Error>, JoinError>;

enum Side<A, B> {
    Left(Joined<A>),
    Right(Joined<B>),
}

/// Runs `a` and `b` concurrently as child tasks and returns both values.
///
/// # Errors
///
/// - `ErrorKind::Cancelled` if `cx` was cancelled before or during.
/// - `ErrorKind::NoRuntime` if `cx` has no runtime.
/// - The first child failure. A child that panicked surfaces as
///   `ErrorKind::ChildPanicked`.
///
/// # Example
///
/// ```ignore
/// let (profile, avatar) = join2(
///     &cx,
///     |cx| async move { load_profile(&cx, id).await },
///     |cx| async move { load_avatar(&cx, id).await },
/// )
/// .await?;
/// ```
pub async fn join2<A, B, FA, FB, RA, RB>(cx: &Cx, a: FA, b: FB) -> Result<(A, B), Error>
where
    FA: FnOnce(Cx) -> RA,
    FB: FnOnce(Cx) -> RB,
    RA: Future<Output = Result<A, Error>> + Send + 'static,
    RB: Future<Output = Result<B, Error>> + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    cx.checkpoint()?;
    let group = cx.child();
    let mut left = group.spawn(a)?;
    let mut right = match group.spawn(b) {
        Ok(handle) => handle,
        Err(err) => {
            group.cancel(CancelReason::sibling_failed());
            let _ = left.await;
            return Err(err);
        }
    };

    let mut left_value: Option<A> = None;
    let mut right_value: Option<B> = None;

    loop {
        let (left_open, right_open) = (left_value.is_none(), right_value.is_none());
        if !left_open && !right_open {
            break;
        }
        // Only the flags enter the poll closure; the values need not be `Sync`.
        let step = cx
            .run_cancellable(std::future::poll_fn(|task_cx| {
                if left_open {
                    if let Poll::Ready(joined) = Pin::new(&mut left).poll(task_cx) {
                        return Poll::Ready(Side::Left(joined));
                    }
                }
                if right_open {
                    if let Poll::Ready(joined) = Pin::new(&mut right).poll(task_cx) {
                        return Poll::Ready(Side::Right(joined));
                    }
                }
                Poll::Pending
            }))
            .await;

        let step = match step {
            Ok(step) => step,
            Err(cancelled) => {
                group.cancel(CancelReason::parent_cancelled());
                drain(&mut left, left_value.is_none()).await;
                drain(&mut right, right_value.is_none()).await;
                return Err(cancelled);
            }
        };

        let failure = match step {
            Side::Left(joined) => match settled(joined) {
                Ok(value) => {
                    left_value = Some(value);
                    None
                }
                Err(err) => {
                    drain_after_failure(&group, &mut right, right_value.is_none()).await;
                    Some(err)
                }
            },
            Side::Right(joined) => match settled(joined) {
                Ok(value) => {
                    right_value = Some(value);
                    None
                }
                Err(err) => {
                    drain_after_failure(&group, &mut left, left_value.is_none()).await;
                    Some(err)
                }
            },
        };
        if let Some(err) = failure {
            return Err(err);
        }
    }

    match (left_value, right_value) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Error::internal("join finished without both values")),
    }
}

/// Runs three children concurrently and returns all three values.
///
/// # Errors
///
/// As [`join2`].
pub async fn join3<A, B, C, FA, FB, FC, RA, RB, RC>(
    cx: &Cx,
    a: FA,
    b: FB,
    c: FC,
) -> Result<(A, B, C), Error>
where
    FA: FnOnce(Cx) -> RA,
    FB: FnOnce(Cx) -> RB + Send + 'static,
    FC: FnOnce(Cx) -> RC + Send + 'static,
    RA: Future<Output = Result<A, Error>> + Send + 'static,
    RB: Future<Output = Result<B, Error>> + Send + 'static,
    RC: Future<Output = Result<C, Error>> + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    let (a, (b, c)) = join2(cx, a, move |cx| async move { join2(&cx, b, c).await }).await?;
    Ok((a, b, c))
}

fn settled<T>(joined: Joined<T>) -> Result<T, Error> {
    match child_outcome(joined) {
        Outcome::Ok(value) => Ok(value),
        failed => Err(into_error(failed)),
    }
}

async fn drain_after_failure<T>(group: &Cx, sibling: &mut TaskHandle<T>, running: bool) {
    debug!(task_id = %group.task_id(), "join child failed; cancelling sibling");
    group.cancel(CancelReason::sibling_failed());
    drain(sibling, running).await;
}

async fn drain<T>(handle: &mut TaskHandle<T>, running: bool) {
    if running {
        let _ = handle.await;
    }
}
