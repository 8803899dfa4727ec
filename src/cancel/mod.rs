//! Cancellation tokens: the tree that carries cancel requests top-down.
//!
//! Every scope (root context, spawned task, fan-out group, registry entry)
//! owns a [`CancelToken`]. Tokens form a tree: cancelling a token cancels
//! all of its descendants. Below a spawned task they see
//! [`CancelKind::ParentCancelled`]; a bare scope such as a fan-out group
//! hands its own reason down, and shutdown is always kept as shutdown.
//! A child never cancels its parent or its siblings.
//!
//! A token has the same tri-state lifecycle as a task:
//! `Running → CancelRequested → Finished`. `cancel()` on a token that already
//! requested cancellation is a no-op, which makes it idempotent. A finished
//! token keeps its state, but the request still reaches work it started.
//!
//! [`CancelKind::ParentCancelled`]: crate::types::CancelKind::ParentCancelled

mod token;

pub use token::{CancelToken, Cancelled};
