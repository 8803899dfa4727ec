//! Error types and error handling strategy.
//!
//! Every fallible operation in the crate resolves to exactly one terminal
//! outcome. When that outcome is not a value it is an [`Error`] whose
//! [`ErrorKind`] says which of three things happened:
//!
//! - **Cancellation**: the caller (or an ancestor scope, or a timer) asked the
//!   work to stop. Carries the [`CancelReason`].
//! - **Upstream failure**: the wrapped work itself failed. The original error is
//!   kept as the [`std::error::Error::source`] and can be recovered with
//!   [`Error::downcast_upstream`].
//! - **Protocol violation**: a usage contract was broken (continuation resumed
//!   twice or dropped without resuming, value emitted after a producer
//!   terminated). These are programming errors; see
//!   [`ViolationResponse`](crate::runtime::ViolationResponse).
//!
//! A handful of runtime kinds (poisoned domain, missing runtime, closed
//! channel, child panic) complete the taxonomy. No primitive retries on any
//! of them; retry policy belongs to callers.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::types::{CancelReason, PanicPayload, TaskId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled.
    Cancelled,

    // === Upstream ===
    /// The wrapped work failed; the original error is the source.
    Upstream,
    /// A child unit of work panicked.
    ChildPanicked,

    // === Programming errors ===
    /// A usage contract was broken.
    ProtocolViolation,
    /// An isolation domain is poisoned by a panic inside an exclusive section.
    Poisoned,

    // === Runtime ===
    /// The operation needs a runtime but the context has none.
    NoRuntime,
    /// A channel's other side is gone.
    ChannelClosed,
    /// Internal invariant broken (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Upstream | Self::ChildPanicked => ErrorCategory::Upstream,
            Self::ProtocolViolation | Self::Poisoned => ErrorCategory::Programming,
            Self::NoRuntime | Self::ChannelClosed | Self::Internal => ErrorCategory::Runtime,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancelled => "cancelled",
            Self::Upstream => "upstream failure",
            Self::ChildPanicked => "child panicked",
            Self::ProtocolViolation => "protocol violation",
            Self::Poisoned => "poisoned",
            Self::NoRuntime => "no runtime",
            Self::ChannelClosed => "channel closed",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The work was asked to stop.
    Cancellation,
    /// The work itself failed.
    Upstream,
    /// A usage contract was broken; not a runtime condition.
    Programming,
    /// The surrounding runtime could not serve the request.
    Runtime,
}

/// The main error type.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    reason: Option<CancelReason>,
    task_id: Option<TaskId>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            reason: None,
            task_id: None,
            source: None,
        }
    }

    /// Creates a cancellation error from a reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_reason(reason.clone())
    }

    /// Wraps a failure of the underlying work.
    ///
    /// An `Error` passed in is returned unchanged, so nested orchestration
    /// (a fan-out child that itself awaits a bridge) reports the innermost
    /// kind instead of `Upstream(Upstream(..))`.
    #[must_use]
    pub fn upstream<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut slot = Some(source);
        if let Some(own) = (&mut slot as &mut dyn Any).downcast_mut::<Option<Self>>() {
            if let Some(err) = own.take() {
                return err;
            }
        }
        match slot {
            Some(source) => Self::new(ErrorKind::Upstream).with_source(source),
            None => Self::internal("upstream error taken twice"),
        }
    }

    /// Creates a protocol-violation error.
    #[must_use]
    pub fn protocol_violation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation).with_message(detail)
    }

    /// Creates an error for a child that panicked.
    #[must_use]
    pub fn child_panicked(payload: &PanicPayload) -> Self {
        Self::new(ErrorKind::ChildPanicked).with_message(payload.message())
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Adds a message to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches the task that produced this error.
    #[must_use]
    pub const fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    fn with_reason(mut self, reason: CancelReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this is a cancellation error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this cancellation was driven by a timer.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.reason.as_ref().is_some_and(CancelReason::is_timeout)
    }

    /// Returns true if this error reports a broken usage contract.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::ProtocolViolation)
    }

    /// Returns true if the wrapped work failed.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self.kind, ErrorKind::Upstream)
    }

    /// Returns the cancellation reason, if this is a cancellation error.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.reason.as_ref()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the task that produced this error, if recorded.
    #[must_use]
    pub const fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Returns the upstream error as `E` if it has that type.
    #[must_use]
    pub fn downcast_upstream<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref::<E>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<CancelReason> for Error {
    fn from(reason: CancelReason) -> Self {
        Self::cancelled(&reason)
    }
}

/// A specialized Result type for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Extension trait for adding context to results.
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}
