//! Runtime configuration types.
//!
//! Prefer [`RuntimeBuilder`](super::builder::RuntimeBuilder) over building a
//! [`RuntimeConfig`] by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"taskweave-worker"` |
//! | `high_priority_streak` | 16 |
//! | `park_timeout` | 50 ms |
//! | `violation_response` | `Panic` in debug builds, `Log` in release builds |

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::tracing_compat::error;

/// What to do when a usage contract is broken at runtime.
///
/// Covers a continuation resumed twice or dropped without resuming, and a
/// producer emitting after it terminated. In every mode the offending call
/// still returns [`ErrorKind::ProtocolViolation`](crate::error::ErrorKind::ProtocolViolation)
/// when it has a return channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationResponse {
    /// Panic immediately with diagnostic details.
    Panic,
    /// Log at error level and continue.
    Log,
    /// Continue without logging.
    Silent,
}

impl ViolationResponse {
    /// Reports a violation and returns the error describing it.
    ///
    /// # Panics
    ///
    /// Panics when the response is [`ViolationResponse::Panic`].
    pub fn report(self, detail: &str) -> Error {
        match self {
            Self::Panic => panic!("protocol violation: {detail}"),
            Self::Log => error!(detail, "protocol violation"),
            Self::Silent => {}
        }
        Error::protocol_violation(detail)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "panic" => Some(Self::Panic),
            "log" => Some(Self::Log),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }
}

impl Default for ViolationResponse {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Log
        }
    }
}

impl std::str::FromStr for ViolationResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("expected panic/log/silent, got {s:?}"))
    }
}

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Consecutive high-priority dispatches before a lower lane gets a turn.
    pub high_priority_streak: usize,
    /// Upper bound on how long an idle worker sleeps before re-checking queues.
    pub park_timeout: Duration,
    /// Response to broken continuation/producer contracts.
    pub violation_response: ViolationResponse,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = 2 * 1024 * 1024;
        }
        if self.high_priority_streak == 0 {
            self.high_priority_streak = 1;
        }
        if self.park_timeout.is_zero() {
            self.park_timeout = Duration::from_millis(1);
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "taskweave-worker".to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "taskweave-worker".to_string(),
            high_priority_streak: 16,
            park_timeout: Duration::from_millis(50),
            violation_response: ViolationResponse::default(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("high_priority_streak", &self.high_priority_streak)
            .field("park_timeout", &self.park_timeout)
            .field("violation_response", &self.violation_response)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}
