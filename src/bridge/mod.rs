//! Continuation bridge: one callback completion becomes one `.await`.
//!
//! Legacy APIs that report completion through a callback are wrapped by
//! [`bridge`]: it calls `setup` synchronously with a fresh [`Continuation`]
//! and suspends until the continuation is resumed exactly once.
//!
//! ```ignore
//! let bytes = bridge(&cx, |k| {
//!     legacy_client.fetch(url, move |result| k.resume_with(result));
//! })
//! .await?;
//! ```
//!
//! # Outcomes
//!
//! | Event                                  | Caller sees                 |
//! |----------------------------------------|-----------------------------|
//! | `resume(v)`                            | `Ok(v)`                     |
//! | `resume_with_error(e)`                 | `ErrorKind::Upstream` (`e`) |
//! | caller cancelled while suspended       | `ErrorKind::Cancelled`      |
//! | every token dropped without resuming   | `ErrorKind::ProtocolViolation` |
//!
//! A token leaked forever (`mem::forget`, stored and never called) leaves
//! the caller suspended until it is cancelled.

mod continuation;

pub use continuation::{Continuation, SharedContinuation};

use std::convert::Infallible;

use crate::channel::oneshot;
use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::ViolationResponse;
use crate::tracing_compat::{error, trace};

/// Suspends until the continuation passed to `setup` is resumed.
///
/// If `cx` is already cancelled, `setup` is not called.
///
/// # Errors
///
/// See the module table.
pub async fn bridge<T, E, F>(cx: &Cx, setup: F) -> Result<T, Error>
where
    F: FnOnce(Continuation<T, E>),
    E: std::error::Error + Send + Sync + 'static,
{
    Bridge::new().run(cx, setup).await
}

/// [`bridge`] for callbacks that cannot fail.
///
/// # Errors
///
/// `ErrorKind::Cancelled` or `ErrorKind::ProtocolViolation`.
pub async fn bridge_value<T, F>(cx: &Cx, setup: F) -> Result<T, Error>
where
    F: FnOnce(Continuation<T, Infallible>),
{
    Bridge::new().run(cx, setup).await
}

/// Per-call bridge options.
#[derive(Debug, Clone, Copy)]
pub struct Bridge {
    label: &'static str,
    response: Option<ViolationResponse>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// Creates a bridge with the default label and the runtime's violation
    /// response.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            label: "bridge",
            response: None,
        }
    }

    /// Names the bridged call in logs and violation reports.
    #[must_use]
    pub const fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Overrides how a double resume is reported.
    #[must_use]
    pub const fn violation_response(mut self, response: ViolationResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Calls `setup` with a fresh continuation and waits for its resume.
    ///
    /// # Errors
    ///
    /// See the module table.
    pub async fn run<T, E, F>(self, cx: &Cx, setup: F) -> Result<T, Error>
    where
        F: FnOnce(Continuation<T, E>),
        E: std::error::Error + Send + Sync + 'static,
    {
        cx.checkpoint()?;
        let label = self.label;
        let response = self.response.unwrap_or_else(|| cx.violation_response());

        let (sender, mut receiver) = oneshot::channel();
        trace!(bridge = label, task_id = %cx.task_id(), "bridge suspended");
        setup(Continuation::new(sender, label, response));

        match receiver.recv(cx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::upstream(err)),
            Err(oneshot::RecvError::Cancelled) => {
                trace!(bridge = label, "bridge caller cancelled");
                let reason = cx.cancel_reason().unwrap_or_default();
                Err(Error::cancelled(&reason).with_task(cx.task_id()))
            }
            Err(oneshot::RecvError::Closed) => {
                error!(bridge = label, "continuation dropped without resuming");
                Err(Error::protocol_violation(format!(
                    "continuation `{label}` dropped without resuming"
                )))
            }
        }
    }
}
