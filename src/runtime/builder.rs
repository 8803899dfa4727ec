//! Runtime builder and handles.

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::cx::Cx;
use crate::runtime::config::{RuntimeConfig, ViolationResponse};
use crate::runtime::scheduler::{self, Scheduler};
use crate::runtime::task;
use crate::runtime::task_handle::TaskHandle;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Priority, TaskId};

/// Error returned when a runtime cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A configuration value (builder, environment or file) is invalid.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}

impl BuildError {
    /// Creates an [`BuildError::InvalidConfig`] with the given message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Builder for constructing a runtime with custom configuration.
///
/// Later calls win, so the usual layering is file, then environment, then
/// explicit setters:
///
/// ```ignore
/// let runtime = RuntimeBuilder::from_toml("runtime.toml")?
///     .with_env_overrides()?
///     .worker_threads(4)
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set how many high-lane tasks may run back to back.
    #[must_use]
    pub fn high_priority_streak(mut self, streak: usize) -> Self {
        self.config.high_priority_streak = streak;
        self
    }

    /// Set the idle worker park timeout.
    #[must_use]
    pub fn park_timeout(mut self, timeout: Duration) -> Self {
        self.config.park_timeout = timeout;
        self
    }

    /// Set the response to broken usage contracts.
    #[must_use]
    pub fn violation_response(mut self, response: ViolationResponse) -> Self {
        self.config.violation_response = response;
        self
    }

    /// Register a callback to run when each worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when each worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Apply `TASKWEAVE_*` environment variables on top of the current config.
    ///
    /// # Errors
    ///
    /// [`BuildError::InvalidConfig`] if a variable is set to an unparsable value.
    pub fn with_env_overrides(mut self) -> Result<Self, BuildError> {
        super::env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Start from a TOML configuration file.
    ///
    /// # Errors
    ///
    /// [`BuildError::InvalidConfig`] if the file cannot be read or parsed.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, BuildError> {
        let toml = super::env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &toml)?;
        Ok(builder)
    }

    /// Start from a TOML configuration string.
    ///
    /// # Errors
    ///
    /// [`BuildError::InvalidConfig`] if the string cannot be parsed.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, BuildError> {
        let parsed = super::env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &parsed)?;
        Ok(builder)
    }

    /// Returns the configuration built so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a runtime from this configuration.
    ///
    /// # Errors
    ///
    /// [`BuildError::Spawn`] if a worker thread cannot be started.
    pub fn build(self) -> Result<Runtime, BuildError> {
        Runtime::with_config(self.config)
    }

    /// Single worker thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Multi-threaded runtime with defaults.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    scheduler: Arc<Scheduler>,
    root: CancelToken,
}

/// Runtime instance created from a [`RuntimeBuilder`].
///
/// Dropping the runtime cancels every task with [`CancelReason::shutdown`],
/// lets the workers drain their queues, joins them and drops whatever is
/// left. Handles of dropped tasks resolve to `JoinError::Cancelled(shutdown)`.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    workers: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    ///
    /// # Errors
    ///
    /// [`BuildError::Spawn`] if a worker thread cannot be started. Workers
    /// started before the failure are shut down.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, BuildError> {
        config.normalize();
        let scheduler = Arc::new(Scheduler::new(&config));
        let inner = Arc::new(RuntimeInner {
            config,
            scheduler,
            root: CancelToken::new(),
        });
        let mut runtime = Self {
            inner,
            workers: Vec::new(),
        };

        for index in 0..runtime.inner.config.worker_threads {
            let config = &runtime.inner.config;
            let scheduler = Arc::clone(&runtime.inner.scheduler);
            let on_start = config.on_thread_start.clone();
            let on_stop = config.on_thread_stop.clone();
            let worker = std::thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .stack_size(config.thread_stack_size)
                .spawn(move || {
                    if let Some(callback) = on_start {
                        callback();
                    }
                    scheduler.run_worker();
                    if let Some(callback) = on_stop {
                        callback();
                    }
                })
                .map_err(BuildError::Spawn)?;
            runtime.workers.push(worker);
        }

        debug!(
            workers = runtime.workers.len(),
            violation_response = ?runtime.inner.config.violation_response,
            "runtime started"
        );
        Ok(runtime)
    }

    /// Returns a handle that can spawn tasks from outside the runtime.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns a fresh top-level context attached to this runtime.
    ///
    /// Each call creates its own scope under the runtime root; cancelling it
    /// does not affect other scopes.
    #[must_use]
    pub fn cx(&self) -> Cx {
        self.handle().root_cx()
    }

    /// Run a future to completion on the current thread.
    ///
    /// Work spawned from the future runs on the worker pool.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        super::waker::block_on(future)
    }

    /// Spawns a top-level task. See [`RuntimeHandle::spawn`].
    pub fn spawn<F, Fut>(&self, f: F) -> TaskHandle<Fut::Output>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.handle().spawn(f)
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Shuts the runtime down. Same as dropping it.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.inner.root.cancel(CancelReason::shutdown());
        self.inner.scheduler.shutdown();
        if scheduler::is_worker_thread() {
            // Joining from a worker would wait on ourselves.
            self.workers.clear();
        } else {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
        self.inner.scheduler.terminate();
        debug!("runtime shut down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

/// Handle for spawning tasks onto a runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl RuntimeHandle {
    /// Spawns a top-level task: a child of the runtime root, detached from
    /// whoever called this. Only runtime shutdown or the returned handle
    /// cancel it.
    pub fn spawn<F, Fut>(&self, f: F) -> TaskHandle<Fut::Output>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let cx = self.root_cx();
        let future = f(cx.clone());
        self.spawn_scoped(&cx, future)
    }

    /// Returns a fresh top-level context attached to this runtime.
    #[must_use]
    pub fn root_cx(&self) -> Cx {
        Cx::new(
            TaskId::next(),
            self.inner.root.child(),
            Some(self.clone()),
            Priority::Normal,
        )
    }

    pub(crate) fn spawn_scoped<F>(&self, cx: &Cx, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        task::spawn(&self.inner.scheduler, cx, future)
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Returns true once the runtime started shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.scheduler.is_shutdown()
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
