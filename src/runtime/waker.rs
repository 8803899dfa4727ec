//! Thread-parking waker and the free-standing `block_on` driver.
//!
//! Wakes are de-duplicated through a `notified` flag: any number of wakes
//! between two polls cost one unpark.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

struct ThreadWaker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.notified.swap(true, Ordering::AcqRel) {
            self.thread.unpark();
        }
    }
}

/// Drives `future` to completion on the current thread.
///
/// The thread parks between polls and resumes when the future's waker fires.
/// Needs no runtime; futures that spawn need a `Cx` attached to one.
///
/// Calling this from a runtime worker thread blocks that worker.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let state = Arc::new(ThreadWaker {
        thread: thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&state));
    let mut cx = Context::from_waker(&waker);
    let mut future = std::pin::pin!(future);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        while !state.notified.swap(false, Ordering::AcqRel) {
            thread::park();
        }
    }
}
