//! Isolation domains: state that is only ever touched by one operation at a
//! time.
//!
//! An [`IsolationDomain`] owns a value `S` and hands out access only through
//! closures that run with exclusive access. Callers that arrive while an
//! operation is in flight suspend (they never block a worker thread) and run
//! one after another.
//!
//! The closures are synchronous, so an exclusive section cannot suspend
//! half-way. Data that needs no exclusivity (configuration, ids, other
//! thread-safe handles) lives in the exempt part `X` and is reachable without
//! waiting.
//!
//! # Example
//!
//! ```ignore
//! use taskweave::sync::IsolationDomain;
//!
//! let cache = IsolationDomain::new(HashMap::new()).named("image-cache");
//!
//! cache.run(&cx, |map| map.insert(url.clone(), bytes)).await?;
//! let hit = cache.run(&cx, |map| map.get(&url).cloned()).await?;
//! ```

use std::borrow::Cow;
use std::fmt;

use crate::cx::Cx;
use crate::error::{Error, ErrorKind};
use crate::sync::mutex::{LockError, Mutex, MutexGuard, TryLockError};
use crate::tracing_compat::{trace, warn};

/// A state container with serialized access.
///
/// `S` is the isolated state. `X` is the exempt part, shared without
/// exclusivity. Dropping the last owner drops both.
pub struct IsolationDomain<S, X = ()> {
    state: Mutex<S>,
    exempt: X,
    name: Option<Cow<'static, str>>,
}

impl<S> IsolationDomain<S> {
    /// Creates a domain owning `state`, with no exempt part.
    #[must_use]
    pub fn new(state: S) -> Self {
        Self::with_exempt(state, ())
    }
}

impl<S, X> IsolationDomain<S, X> {
    /// Creates a domain owning `state` with the exempt part `exempt`.
    #[must_use]
    pub fn with_exempt(state: S, exempt: X) -> Self {
        Self {
            state: Mutex::new(state),
            exempt,
            name: None,
        }
    }

    /// Names the domain; the name shows up in log fields and errors.
    #[must_use]
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the domain name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn label(&self) -> &str {
        self.name().unwrap_or("anonymous")
    }

    /// Runs `op` with exclusive access to the state.
    ///
    /// Waits (asynchronously) for operations already in flight.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` if `cx` is cancelled while waiting;
    /// `ErrorKind::Poisoned` if an earlier operation panicked.
    pub async fn run<R, F>(&self, cx: &Cx, op: F) -> Result<R, Error>
    where
        F: FnOnce(&mut S) -> R,
    {
        let mut guard = self.acquire(cx).await?;
        trace!(domain = self.label(), "exclusive section entered");
        let out = op(&mut guard);
        drop(guard);
        Ok(out)
    }

    /// Runs a fallible `op` with exclusive access to the state.
    ///
    /// State changes made before `op` returned `Err` are kept.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus `ErrorKind::Upstream` with the closure's
    /// error as source.
    pub async fn try_run<R, E, F>(&self, cx: &Cx, op: F) -> Result<R, Error>
    where
        F: FnOnce(&mut S) -> Result<R, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(cx, op).await?.map_err(Error::upstream)
    }

    /// Runs `op` only if the domain is idle right now.
    ///
    /// Returns `Ok(None)` if an operation is in flight or queued.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Poisoned` if an earlier operation panicked.
    pub fn try_run_now<R, F>(&self, op: F) -> Result<Option<R>, Error>
    where
        F: FnOnce(&mut S) -> R,
    {
        match self.state.try_lock() {
            Ok(mut guard) => Ok(Some(op(&mut guard))),
            Err(TryLockError::Locked) => Ok(None),
            Err(TryLockError::Poisoned) => Err(self.poisoned()),
        }
    }

    /// Returns the exempt part. Never waits.
    #[must_use]
    pub fn exempt(&self) -> &X {
        &self.exempt
    }

    /// Returns true while an operation holds the state.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.is_locked()
    }

    /// Number of callers waiting for exclusive access.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.waiters()
    }

    /// Returns true if an operation panicked while holding the state.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.is_poisoned()
    }

    /// Accepts the state as it is after a panic and allows operations again.
    pub fn clear_poison(&self) {
        if self.state.is_poisoned() {
            warn!(domain = self.label(), "poison cleared");
        }
        self.state.clear_poison();
    }

    /// Consumes the domain, returning the state.
    pub fn into_inner(self) -> S {
        self.state.into_inner()
    }

    /// Consumes the domain, returning the state and the exempt part.
    pub fn into_parts(self) -> (S, X) {
        (self.state.into_inner(), self.exempt)
    }

    async fn acquire(&self, cx: &Cx) -> Result<MutexGuard<'_, S>, Error> {
        match self.state.lock(cx).await {
            Ok(guard) => Ok(guard),
            Err(LockError::Poisoned) => Err(self.poisoned()),
            Err(LockError::Cancelled) => {
                trace!(domain = self.label(), "domain wait cancelled");
                let reason = cx.cancel_reason().unwrap_or_default();
                Err(Error::cancelled(&reason).with_task(cx.task_id()))
            }
        }
    }

    fn poisoned(&self) -> Error {
        Error::new(ErrorKind::Poisoned).with_message(format!("domain `{}`", self.label()))
    }
}

impl<S: Default, X: Default> Default for IsolationDomain<S, X> {
    fn default() -> Self {
        Self::with_exempt(S::default(), X::default())
    }
}

impl<S, X: fmt::Debug> fmt::Debug for IsolationDomain<S, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationDomain")
            .field("name", &self.name)
            .field("busy", &self.is_busy())
            .field("waiters", &self.waiters())
            .field("poisoned", &self.is_poisoned())
            .field("exempt", &self.exempt)
            .finish()
    }
}
