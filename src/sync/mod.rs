//! Exclusive-access primitives.
//!
//! - [`Mutex`]: async FIFO mutex; waiting is cancel-aware and the guard is
//!   `!Send`
//! - [`IsolationDomain`]: state reachable only through short synchronous
//!   closures, serialized by a [`Mutex`], plus an exempt part that never waits
//! - [`GlobalDomain`] / [`global_domain!`](crate::global_domain): lazily
//!   created process-wide domains
//! - [`DomainRegistry`]: named domains owned by an injected registry
//! - [`ConfinedContext`]: state owned by one dedicated thread
//!
//! # Cancel safety
//!
//! - Cancellation while waiting: the waiter leaves the queue, nothing is held
//! - Panic while holding: the guard is released during unwinding and the
//!   mutex (or domain) is poisoned until `clear_poison`

mod confined;
mod global;
mod isolation;
mod mutex;

pub use confined::{ConfinedContext, ConfinedSink};
pub use global::{DomainRegistry, GlobalDomain};
pub use isolation::IsolationDomain;
pub use mutex::{LockError, Mutex, MutexGuard, TryLockError};
