//! Resumption tokens handed to callback-style code.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::oneshot;
use crate::error::Error;
use crate::runtime::ViolationResponse;
use crate::tracing_compat::trace;

/// Single-use token that resumes a suspended [`bridge`](super::bridge) call.
///
/// Every resume method consumes the token, so resuming twice does not
/// compile. Dropping the token without resuming makes the suspended caller
/// fail with `ErrorKind::ProtocolViolation` instead of hanging.
///
/// Resuming after the caller gave up (it was cancelled) is not an error;
/// the value is discarded.
#[must_use = "dropping a continuation without resuming fails the suspended caller"]
pub struct Continuation<T, E = Infallible> {
    sender: oneshot::Sender<Result<T, E>>,
    label: &'static str,
    response: ViolationResponse,
}

impl<T, E> Continuation<T, E> {
    pub(crate) fn new(
        sender: oneshot::Sender<Result<T, E>>,
        label: &'static str,
        response: ViolationResponse,
    ) -> Self {
        Self {
            sender,
            label,
            response,
        }
    }

    /// Resumes the caller with a value.
    pub fn resume(self, value: T) {
        self.resume_with(Ok(value));
    }

    /// Resumes the caller with a failure; the caller sees
    /// `ErrorKind::Upstream` with `error` as source.
    pub fn resume_with_error(self, error: E) {
        self.resume_with(Err(error));
    }

    /// Resumes the caller with `result`.
    pub fn resume_with(self, result: Result<T, E>) {
        let label = self.label;
        if self.sender.send(result).is_err() {
            trace!(bridge = label, "caller already left; resume discarded");
        }
    }

    /// Returns true if the suspended caller is gone (cancelled or dropped).
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }

    /// Returns the label of the bridged call.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Converts into a clonable token for callback APIs that cannot move it.
    ///
    /// The exactly-once contract is then checked at runtime.
    pub fn share(self) -> SharedContinuation<T, E> {
        let label = self.label;
        let response = self.response;
        SharedContinuation {
            slot: Arc::new(Mutex::new(Some(self))),
            label,
            response,
        }
    }
}

impl<T, E> fmt::Debug for Continuation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("label", &self.label)
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Clonable continuation whose first resume wins.
///
/// A second resume is a protocol violation: it is reported per the
/// bridge's [`ViolationResponse`] and returns `Err`. Dropping every clone
/// without resuming fails the caller exactly like dropping a
/// [`Continuation`].
pub struct SharedContinuation<T, E = Infallible> {
    slot: Arc<Mutex<Option<Continuation<T, E>>>>,
    label: &'static str,
    response: ViolationResponse,
}

impl<T, E> SharedContinuation<T, E> {
    /// Resumes the caller with a value.
    ///
    /// # Errors
    ///
    /// `ErrorKind::ProtocolViolation` if the continuation was already
    /// resumed.
    pub fn resume(&self, value: T) -> Result<(), Error> {
        self.resume_with(Ok(value))
    }

    /// Resumes the caller with a failure.
    ///
    /// # Errors
    ///
    /// `ErrorKind::ProtocolViolation` if the continuation was already
    /// resumed.
    pub fn resume_with_error(&self, error: E) -> Result<(), Error> {
        self.resume_with(Err(error))
    }

    /// Resumes the caller with `result`.
    ///
    /// # Errors
    ///
    /// `ErrorKind::ProtocolViolation` if the continuation was already
    /// resumed.
    pub fn resume_with(&self, result: Result<T, E>) -> Result<(), Error> {
        let continuation = self.slot.lock().take();
        match continuation {
            Some(continuation) => {
                continuation.resume_with(result);
                Ok(())
            }
            None => Err(self
                .response
                .report(&format!("continuation `{}` resumed twice", self.label))),
        }
    }

    /// Returns true once any clone resumed.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T, E> Clone for SharedContinuation<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            label: self.label,
            response: self.response,
        }
    }
}

impl<T, E> fmt::Debug for SharedContinuation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContinuation")
            .field("label", &self.label)
            .field("resumed", &self.is_resumed())
            .finish()
    }
}
