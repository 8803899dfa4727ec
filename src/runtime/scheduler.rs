//! Three-lane priority scheduler shared by the worker pool.
//!
//! Lanes map one-to-one to [`Priority`]:
//! 1. High lane - latency-sensitive work
//! 2. Normal lane - default
//! 3. Low lane - background work
//!
//! The high lane wins until it has been served `high_priority_streak` times
//! in a row; then one lower-lane task gets a turn so background work always
//! makes progress. Idle workers park on a condvar with a bounded timeout.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::runtime::config::RuntimeConfig;
use crate::runtime::task::Task;
use crate::tracing_compat::trace;
use crate::types::Priority;

thread_local! {
    static IS_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Returns true when called from one of the runtime's worker threads.
pub(crate) fn is_worker_thread() -> bool {
    IS_WORKER.with(Cell::get)
}

pub(crate) struct Scheduler {
    high: SegQueue<Arc<Task>>,
    normal: SegQueue<Arc<Task>>,
    low: SegQueue<Arc<Task>>,
    streak: AtomicUsize,
    idle: Mutex<()>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    terminated: AtomicBool,
    high_priority_streak: usize,
    park_timeout: Duration,
}

impl Scheduler {
    pub(crate) fn new(config: &RuntimeConfig) -> Self {
        Self {
            high: SegQueue::new(),
            normal: SegQueue::new(),
            low: SegQueue::new(),
            streak: AtomicUsize::new(0),
            idle: Mutex::new(()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            high_priority_streak: config.high_priority_streak.max(1),
            park_timeout: config.park_timeout,
        }
    }

    fn lane(&self, priority: Priority) -> &SegQueue<Arc<Task>> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    /// Queues a task and wakes one idle worker.
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.lane(task.priority()).push(task);
        // Notify under the idle lock so a worker between its emptiness check
        // and its wait cannot miss the signal.
        let _guard = self.idle.lock();
        self.wakeup.notify_one();
    }

    /// Pops the next task, honoring the high-lane streak limit.
    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        if self.streak.load(Ordering::Relaxed) < self.high_priority_streak {
            if let Some(task) = self.high.pop() {
                self.streak.fetch_add(1, Ordering::Relaxed);
                return Some(task);
            }
        }
        self.streak.store(0, Ordering::Relaxed);
        self.normal
            .pop()
            .or_else(|| self.low.pop())
            .or_else(|| self.high.pop())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.low.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    /// Worker loop: run tasks until shutdown is requested and the queues are empty.
    pub(crate) fn run_worker(&self) {
        IS_WORKER.with(|flag| flag.set(true));
        loop {
            if let Some(task) = self.pop() {
                task.run();
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let mut guard = self.idle.lock();
            if self.is_empty() && !self.shutdown.load(Ordering::Acquire) {
                self.wakeup.wait_for(&mut guard, self.park_timeout);
            }
        }
        IS_WORKER.with(|flag| flag.set(false));
        trace!("worker exiting");
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Asks workers to exit once the queues drain.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.idle.lock();
        self.wakeup.notify_all();
    }

    /// Drops every queued future. Tasks woken afterwards drop their future
    /// instead of queueing.
    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        let mut dropped = 0usize;
        while let Some(task) = self.pop() {
            task.abandon();
            dropped += 1;
        }
        trace!(dropped, "scheduler terminated");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("high", &self.high.len())
            .field("normal", &self.normal.len())
            .field("low", &self.low.len())
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
