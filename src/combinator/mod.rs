//! Combinators for structured concurrency.
//!
//! - [`fan_out`]: N homogeneous children with an explicit failure policy
//!   and collect order
//! - [`join`]: fixed-arity children returning a tuple, fail-fast
//! - [`timeout`](mod@timeout): a deadline on a single operation
//!
//! Every combinator scopes its children under the caller's `Cx`: when the
//! combinator returns, every child it started has reached a terminal state.

pub mod fan_out;
pub mod join;
pub mod timeout;

pub use fan_out::{CollectOrder, FanOut, FanOutPolicy};
pub use join::{join2, join3};
pub use timeout::{timeout, timeout_at};
