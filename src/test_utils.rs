//! Test utilities shared by unit tests and (with `test-internals`) by
//! downstream test suites.
//!
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A runtime-backed async test runner
//! - Outcome assertion macros
//!
//! ```ignore
//! use taskweave::test_utils::{init_test_logging, run_test};
//!
//! init_test_logging();
//! run_test(|cx| async move {
//!     cx.sleep(std::time::Duration::from_millis(1)).await.unwrap();
//! });
//! ```

use std::future::Future;
use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use std::time::Duration;

use tracing_subscriber::fmt::format::FmtSpan;

use crate::cx::Cx;
use crate::runtime::{Runtime, RuntimeBuilder};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Worker count used by [`test_runtime`].
pub const TEST_WORKER_THREADS: usize = 4;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a small multi-threaded runtime for tests.
///
/// Protocol violations are logged rather than panicking so tests can
/// assert on the returned errors.
///
/// # Panics
///
/// Panics if the worker threads cannot be spawned.
#[must_use]
pub fn test_runtime() -> Runtime {
    RuntimeBuilder::new()
        .worker_threads(TEST_WORKER_THREADS)
        .thread_name_prefix("taskweave-test")
        .violation_response(crate::runtime::ViolationResponse::Log)
        .build()
        .expect("failed to build test runtime")
}

/// Run async test code on a fresh [`test_runtime`] with its root `Cx`.
pub fn run_test<F, Fut>(f: F) -> Fut::Output
where
    F: FnOnce(Cx) -> Fut,
    Fut: Future,
{
    init_test_logging();
    let runtime = test_runtime();
    let cx = runtime.cx();
    runtime.block_on(f(cx))
}

/// Assert that an async operation completes within a timeout.
///
/// # Panics
///
/// Panics if the deadline passes first.
pub async fn assert_completes_within<Fut, T>(
    cx: &Cx,
    timeout_duration: Duration,
    description: &str,
    fut: Fut,
) -> T
where
    Fut: Future<Output = T>,
{
    let Ok(value) = crate::combinator::timeout(cx, timeout_duration, fut).await else {
        panic!("operation '{description}' did not complete within {timeout_duration:?}");
    };
    tracing::debug!(
        description = %description,
        timeout_ms = timeout_duration.as_millis(),
        "operation completed within timeout"
    );
    value
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an outcome is Ok with a specific value.
#[macro_export]
macro_rules! assert_outcome_ok {
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            $crate::types::Outcome::Ok(v) => assert_eq!(v, $expected),
            other => panic!("expected Outcome::Ok({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an outcome is Cancelled.
#[macro_export]
macro_rules! assert_outcome_cancelled {
    ($outcome:expr) => {
        match $outcome {
            $crate::types::Outcome::Cancelled(_) => {}
            other => panic!("expected Outcome::Cancelled, got {:?}", other),
        }
    };
}

/// Assert that an outcome is Err.
#[macro_export]
macro_rules! assert_outcome_err {
    ($outcome:expr) => {
        match $outcome {
            $crate::types::Outcome::Err(_) => {}
            other => panic!("expected Outcome::Err, got {:?}", other),
        }
    };
}

/// Failure type used by tests that need an upstream error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("test failure: {0}")]
pub struct TestError(pub &'static str);
