//! Channel primitives.
//!
//! - [`oneshot`]: exactly one value from one sender to one receiver; carries
//!   task results and bridged completions
//! - [`watch`]: latest-value channel for publishing observable state
//!
//! Every waiting operation has a cancel-aware form taking a [`Cx`](crate::Cx).

pub mod oneshot;
pub mod watch;
