//! Runtime: worker pool, scheduling and task lifecycle.
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and handles
//! - [`env_config`]: `TASKWEAVE_*` environment variables and TOML files
//! - `scheduler`: Three-lane priority scheduler
//! - [`task_handle`]: [`TaskHandle`] for awaiting and cancelling spawned work
//! - [`registry`]: [`TaskRegistry`] for bulk cancellation
//! - `waker`: Thread-parking waker behind [`block_on`]
//!
//! # Runtime Builder
//!
//! ```ignore
//! use taskweave::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(4).build()?;
//! let cx = runtime.cx();
//! let value = runtime.block_on(async move {
//!     let handle = cx.spawn(|_| async { 42 })?;
//!     Ok::<_, taskweave::Error>(handle.await?)
//! })?;
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod registry;
pub(crate) mod scheduler;
pub(crate) mod task;
pub mod task_handle;
mod waker;
mod yield_now;

pub use builder::{BuildError, Runtime, RuntimeBuilder, RuntimeHandle};
pub use config::{RuntimeConfig, ViolationResponse};
pub use registry::TaskRegistry;
pub use task_handle::{CancelHandle, JoinError, TaskHandle};
pub use waker::block_on;
pub use yield_now::{yield_now, YieldNow};
