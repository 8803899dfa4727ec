//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `TASKWEAVE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TASKWEAVE_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `TASKWEAVE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `TASKWEAVE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `TASKWEAVE_HIGH_PRIORITY_STREAK` | `usize` | `high_priority_streak` |
//! | `TASKWEAVE_PARK_TIMEOUT_MS` | `u64` | `park_timeout` |
//! | `TASKWEAVE_VIOLATION_RESPONSE` | `panic`/`log`/`silent` | `violation_response` |

use std::time::Duration;

use crate::runtime::builder::BuildError;
use crate::runtime::config::{RuntimeConfig, ViolationResponse};

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "TASKWEAVE_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "TASKWEAVE_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "TASKWEAVE_THREAD_NAME_PREFIX";
/// Environment variable name for the high-priority lane streak limit.
pub const ENV_HIGH_PRIORITY_STREAK: &str = "TASKWEAVE_HIGH_PRIORITY_STREAK";
/// Environment variable name for the idle-worker park timeout in milliseconds.
pub const ENV_PARK_TIMEOUT_MS: &str = "TASKWEAVE_PARK_TIMEOUT_MS";
/// Environment variable name for the protocol-violation response.
pub const ENV_VIOLATION_RESPONSE: &str = "TASKWEAVE_VIOLATION_RESPONSE";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_HIGH_PRIORITY_STREAK) {
        config.high_priority_streak = parse_usize(ENV_HIGH_PRIORITY_STREAK, &val)?;
    }
    if let Some(val) = read_env(ENV_PARK_TIMEOUT_MS) {
        config.park_timeout = Duration::from_millis(parse_u64(ENV_PARK_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_VIOLATION_RESPONSE) {
        config.violation_response = parse_violation_response(ENV_VIOLATION_RESPONSE, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, BuildError> {
    val.trim().parse::<usize>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, BuildError> {
    val.trim().parse::<u64>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_violation_response(var_name: &str, val: &str) -> Result<ViolationResponse, BuildError> {
    val.parse::<ViolationResponse>()
        .map_err(|e| BuildError::custom(format!("invalid value for {var_name}: {e}")))
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// high_priority_streak = 16
/// park_timeout_ms = 50
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
///
/// [diagnostics]
/// violation_response = "log"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Diagnostics settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// High-priority lane streak limit.
    pub high_priority_streak: Option<usize>,
    /// Idle-worker park timeout in milliseconds.
    pub park_timeout_ms: Option<u64>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Diagnostics section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct DiagnosticsToml {
    /// `panic`, `log` or `silent`.
    pub violation_response: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut RuntimeConfig,
    toml: &RuntimeTomlConfig,
) -> Result<(), BuildError> {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.high_priority_streak {
        config.high_priority_streak = v;
    }
    if let Some(v) = toml.scheduler.park_timeout_ms {
        config.park_timeout = Duration::from_millis(v);
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(ref v) = toml.diagnostics.violation_response {
        config.violation_response = parse_violation_response("diagnostics.violation_response", v)?;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, BuildError> {
    toml::from_str(toml_str)
        .map_err(|e| BuildError::custom(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::custom(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}
