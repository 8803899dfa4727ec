//! Bulk cancellation of outstanding work owned by one scope.
//!
//! A [`TaskRegistry`] belongs to whatever creates the work (a view model, a
//! connection, a session). Handles are kept in registration order;
//! [`TaskRegistry::cancel_all`] cancels them in that order and empties the
//! registry. Dropping the registry does the same, so outstanding work never
//! outlives its owner.
//!
//! ```ignore
//! let registry = TaskRegistry::new();
//! registry.spawn(&cx, |cx| async move { refresh(&cx).await })?;
//! // owner goes away
//! drop(registry); // every tracked task is cancelled
//! ```

use std::future::Future;

use parking_lot::Mutex;

use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::task_handle::{CancelHandle, TaskHandle};
use crate::tracing_compat::debug;
use crate::types::CancelReason;

/// Ordered collection of cancel handles for bulk cancellation.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    handles: Mutex<Vec<CancelHandle>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a task. Returns false, without tracking, if it already finished.
    pub fn track<T>(&self, handle: &TaskHandle<T>) -> bool {
        self.track_handle(handle.cancel_handle())
    }

    /// Tracks a split-off cancel handle. Finished tasks are never added.
    pub fn track_handle(&self, handle: CancelHandle) -> bool {
        if handle.is_finished() {
            return false;
        }
        self.handles.lock().push(handle);
        true
    }

    /// Spawns a child of `cx` and tracks it.
    ///
    /// # Errors
    ///
    /// Whatever [`Cx::spawn`] returns.
    pub fn spawn<F, Fut>(&self, cx: &Cx, f: F) -> Result<TaskHandle<Fut::Output>, Error>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handle = cx.spawn(f)?;
        self.track(&handle);
        Ok(handle)
    }

    /// Number of tracked handles, finished ones included until pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Forgets handles whose tasks already finished. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|h| !h.is_finished());
        before - handles.len()
    }

    /// Cancels every tracked task in registration order and empties the registry.
    ///
    /// Returns how many tasks this call actually moved to `CancelRequested`.
    pub fn cancel_all(&self) -> usize {
        self.cancel_all_with(&CancelReason::scope_ended())
    }

    /// As [`cancel_all`](Self::cancel_all) with an explicit reason.
    pub fn cancel_all_with(&self, reason: &CancelReason) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let total = handles.len();
        let cancelled = handles
            .iter()
            .filter(|h| h.cancel_with(reason.clone()))
            .count();
        if total > 0 {
            debug!(total, cancelled, reason = %reason, "registry cancelled");
        }
        cancelled
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_test;
    use crate::types::TaskState;
    use std::time::Duration;

    #[test]
    fn cancel_all_leaves_nothing_running() {
        run_test(|cx| async move {
            crate::test_phase!("cancel_all_leaves_nothing_running");
            let registry = TaskRegistry::new();
            let mut handles = Vec::new();
            for _ in 0..5 {
                let handle = registry
                    .spawn(&cx, |cx| async move { cx.sleep(Duration::from_secs(30)).await })
                    .unwrap();
                handles.push(handle);
            }
            assert_eq!(registry.len(), 5);

            assert_eq!(registry.cancel_all(), 5);
            assert!(registry.is_empty());
            for handle in &handles {
                assert_ne!(handle.state(), TaskState::Running);
            }
            for mut handle in handles {
                // Either dropped at the next poll or the sleep observed the cancel.
                let result = handle.join(&cx).await;
                assert!(!matches!(result, Ok(Ok(()))), "task completed normally");
                assert!(handle.is_finished());
            }
            crate::test_complete!("cancel_all_leaves_nothing_running");
        });
    }

    #[test]
    fn finished_handles_are_not_tracked() {
        run_test(|cx| async move {
            let registry = TaskRegistry::new();
            let mut handle = cx.spawn(|_| async { 1 }).unwrap();
            assert_eq!(handle.join(&cx).await, Ok(1));
            assert!(!registry.track(&handle));
            assert!(registry.is_empty());
            assert!(!handle.cancel());
        });
    }

    #[test]
    fn drop_cancels_tracked_work() {
        run_test(|cx| async move {
            let registry = TaskRegistry::new();
            let mut handle = registry
                .spawn(&cx, |cx| async move { cx.sleep(Duration::from_secs(30)).await })
                .unwrap();
            drop(registry);
            assert!(handle.is_cancel_requested());
            let result = handle.join(&cx).await;
            assert!(!matches!(result, Ok(Ok(()))), "task completed normally");
        });
    }

    #[test]
    fn prune_forgets_finished() {
        run_test(|cx| async move {
            let registry = TaskRegistry::new();
            let mut quick = registry.spawn(&cx, |_| async {}).unwrap();
            let _slow = registry
                .spawn(&cx, |cx| async move { cx.sleep(Duration::from_secs(30)).await })
                .unwrap();
            quick.join(&cx).await.unwrap();
            assert_eq!(registry.prune(), 1);
            assert_eq!(registry.len(), 1);
        });
    }
}
