//! Process-wide timer driver.
//!
//! One lazily started thread (`taskweave-timer`) keeps a min-heap of
//! deadlines and wakes the registered waker when each one passes. Entries
//! are keyed so a [`Sleep`](super::Sleep) can refresh its waker or
//! cancel on drop; cancelled keys stay in the heap until their deadline and
//! are skipped then.
//!
//! If the timer thread cannot be spawned the driver runs degraded:
//! [`TimerDriver::register`] returns `None` and callers fall back to polling.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, OnceLock};
use std::task::Waker;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::tracing_compat::{trace, warn};

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    wakers: HashMap<u64, Waker>,
    next_key: u64,
}

/// Deadline heap plus the condvar the timer thread sleeps on.
pub(crate) struct TimerDriver {
    state: Mutex<TimerState>,
    condvar: Condvar,
    running: bool,
}

static DRIVER: OnceLock<Arc<TimerDriver>> = OnceLock::new();

/// Returns the process-wide driver, starting its thread on first use.
pub(crate) fn global() -> &'static TimerDriver {
    DRIVER.get_or_init(TimerDriver::start)
}

impl TimerDriver {
    fn start() -> Arc<Self> {
        let pending = Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            condvar: Condvar::new(),
            running: true,
        });
        let worker = Arc::clone(&pending);
        let spawned = std::thread::Builder::new()
            .name("taskweave-timer".into())
            .spawn(move || worker.run());
        match spawned {
            Ok(_) => pending,
            Err(err) => {
                warn!(error = %err, "timer thread unavailable; sleeps will poll");
                Arc::new(Self {
                    state: Mutex::new(TimerState::default()),
                    condvar: Condvar::new(),
                    running: false,
                })
            }
        }
    }

    /// Registers `waker` to fire at `deadline`. `None` in degraded mode.
    pub(crate) fn register(&self, deadline: Instant, waker: &Waker) -> Option<u64> {
        if !self.running {
            return None;
        }
        let mut state = self.state.lock();
        let key = state.next_key;
        state.next_key += 1;
        let earliest = state
            .heap
            .peek()
            .map_or(true, |Reverse((first, _))| deadline < *first);
        state.heap.push(Reverse((deadline, key)));
        state.wakers.insert(key, waker.clone());
        if earliest {
            self.condvar.notify_one();
        }
        Some(key)
    }

    /// Refreshes the waker of a live entry. Returns false if the entry
    /// already fired or was cancelled.
    pub(crate) fn update(&self, key: u64, waker: &Waker) -> bool {
        let mut state = self.state.lock();
        match state.wakers.get_mut(&key) {
            Some(existing) => {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    /// Forgets an entry.
    pub(crate) fn cancel(&self, key: u64) {
        self.state.lock().wakers.remove(&key);
    }

    fn run(&self) {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        loop {
            let now = Instant::now();
            while let Some(Reverse((deadline, key))) = state.heap.peek().copied() {
                if deadline > now {
                    break;
                }
                state.heap.pop();
                if let Some(waker) = state.wakers.remove(&key) {
                    due.push(waker);
                }
            }

            if !due.is_empty() {
                trace!(fired = due.len(), "timers fired");
                MutexGuard::unlocked(&mut state, || {
                    for waker in due.drain(..) {
                        waker.wake();
                    }
                });
                continue;
            }

            match state.heap.peek().copied() {
                Some(Reverse((deadline, _))) => {
                    self.condvar.wait_until(&mut state, deadline);
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::time::Duration;

    struct Flag(AtomicUsize);

    impl Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(flag: &Flag, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while flag.0.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn fires_registered_waker() {
        let flag = Arc::new(Flag(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&flag));
        let driver = global();
        driver
            .register(Instant::now() + Duration::from_millis(5), &waker)
            .expect("timer thread");
        wait_for(&flag, 1);
        assert_eq!(flag.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_entry_never_fires() {
        let flag = Arc::new(Flag(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&flag));
        let driver = global();
        let key = driver
            .register(Instant::now() + Duration::from_millis(5), &waker)
            .expect("timer thread");
        driver.cancel(key);
        assert!(!driver.update(key, &waker));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(flag.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn earlier_deadline_preempts_wait() {
        let late = Arc::new(Flag(AtomicUsize::new(0)));
        let early = Arc::new(Flag(AtomicUsize::new(0)));
        let driver = global();
        let late_key = driver
            .register(Instant::now() + Duration::from_secs(60), &Waker::from(Arc::clone(&late)))
            .expect("timer thread");
        driver
            .register(Instant::now() + Duration::from_millis(5), &Waker::from(Arc::clone(&early)))
            .expect("timer thread");
        wait_for(&early, 1);
        assert_eq!(early.0.load(Ordering::SeqCst), 1);
        assert_eq!(late.0.load(Ordering::SeqCst), 0);
        driver.cancel(late_key);
    }
}
