//! Logging shim used by every module of the crate.
//!
//! - **With `tracing-integration`** (default): re-exports the `tracing` event
//!   macros, so task lifecycle, cancellation and protocol violations show up
//!   in whatever subscriber the host application installs.
//! - **Without it**: the same macro names expand to nothing.
//!
//! ```rust,ignore
//! use taskweave::tracing_compat::{debug, trace};
//!
//! debug!(task_id = %id, "task spawned");
//! trace!(domain = name, "exclusive section entered");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Expansions used when logging is compiled out.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Returns `true` when log output is compiled in.
#[must_use]
pub const fn is_enabled() -> bool {
    cfg!(feature = "tracing-integration")
}
