//! Taskweave: cancel-correct task orchestration.
//!
//! # Overview
//!
//! Taskweave gives applications a small set of primitives for concurrent work
//! that always ends: every operation resolves to exactly one terminal outcome
//! (a value, an error, or a cancellation), and cancelling a scope reaches
//! every piece of work started under it.
//!
//! # Core Guarantees
//!
//! - **Serialized state**: an [`IsolationDomain`](sync::IsolationDomain) runs
//!   at most one operation on its state at a time
//! - **Scoped children**: fan-out and join never return while a child they
//!   started is still running
//! - **Top-down cancellation**: cancelling a [`Cx`] cancels its descendants;
//!   children never cancel their parents
//! - **Exactly-once resumption**: a bridged callback resumes its caller once
//!   or is reported as a protocol violation
//! - **No leaks on teardown**: dropping a producer, a registry or the runtime
//!   cancels what they own
//!
//! # Module Structure
//!
//! - [`types`]: task ids, lifecycle, cancel reasons, outcomes
//! - [`error`]: the crate-wide [`Error`]
//! - [`cancel`]: cancellation tokens
//! - [`cx`]: the capability context handed to every task
//! - [`runtime`]: worker pool, task handles and the task registry
//! - [`time`]: sleep and deadlines
//! - [`channel`]: oneshot and watch channels
//! - [`sync`]: isolation domains, global domains, thread confinement
//! - [`bridge`]: callback-to-await continuations
//! - [`stream`]: cancellable producers and stream adapters
//! - [`combinator`]: fan-out, join and timeout
//! - [`capability`]: fetch and presentation seams

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod cancel;
pub mod capability;
pub mod channel;
pub mod combinator;
pub mod cx;
pub mod error;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use bridge::{bridge, bridge_value, Continuation, SharedContinuation};
pub use capability::{FetchCapability, PresentationSink};
pub use combinator::{join2, join3, timeout, CollectOrder, FanOut, FanOutPolicy};
pub use cx::Cx;
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use runtime::{
    block_on, JoinError, Runtime, RuntimeBuilder, RuntimeHandle, TaskHandle, TaskRegistry,
    ViolationResponse,
};
pub use stream::{Producer, Stream, StreamExt};
pub use sync::{ConfinedContext, DomainRegistry, GlobalDomain, IsolationDomain};
pub use types::{CancelKind, CancelReason, Outcome, PanicPayload, Priority, TaskId, TaskState};
