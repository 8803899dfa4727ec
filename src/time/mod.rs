//! Time primitives: sleep and timeout operations.
//!
//! - [`Sleep`]: A future that completes after a deadline
//! - [`TimeoutFuture`]: A wrapper that adds a deadline to any future
//!
//! Both are backed by one process-wide timer thread, so they work on any
//! executor, including [`block_on`](crate::runtime::block_on).
//!
//! # Cancel Safety
//!
//! - `Sleep`: can be dropped and recreated without side effects
//! - `TimeoutFuture`: the inner future may have side effects on cancellation
//!
//! For cancel-aware waiting use [`Cx::sleep`](crate::Cx::sleep) and
//! [`combinator::timeout`](crate::combinator::timeout).
//!
//! ```ignore
//! use taskweave::time::{sleep, timeout};
//! use std::time::Duration;
//!
//! sleep(Duration::from_millis(100)).await;
//!
//! match timeout(Duration::from_secs(5), expensive_operation()).await {
//!     Ok(result) => println!("Completed: {result}"),
//!     Err(_) => println!("Timed out!"),
//! }
//! ```

pub(crate) mod driver;
mod elapsed;
mod sleep;
mod timeout_future;

pub use elapsed::Elapsed;
pub use sleep::{sleep, sleep_until, Sleep};
pub use timeout_future::{timeout, timeout_at, TimeoutFuture};
