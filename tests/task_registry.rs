#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave::runtime::{JoinError, TaskRegistry};
use taskweave::{CancelKind, Error, TaskState};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

#[test]
fn cancel_all_on_five_handles_leaves_nothing_running() {
    init_test("cancel_all_on_five_handles_leaves_nothing_running");
    run_test_with_cx(|cx| async move {
        test_section!("spawn five long-running tasks");
        let registry = TaskRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let handle = registry
                .spawn(&cx, |cx| async move { cx.sleep(Duration::from_secs(60)).await })
                .expect("spawn");
            handles.push(handle);
        }
        assert_eq!(registry.len(), 5);

        test_section!("cancel all");
        let cancelled = registry.cancel_all();
        assert_with_log!(cancelled == 5, "all five cancelled", 5, cancelled);
        assert!(registry.is_empty());
        for handle in &handles {
            assert_ne!(handle.state(), TaskState::Running);
        }

        for handle in handles {
            match handle.await {
                Ok(Err(err)) => {
                    assert!(err.is_cancelled());
                    assert_eq!(err.cancel_reason().map(|r| r.kind), Some(CancelKind::ScopeEnded));
                }
                Err(JoinError::Cancelled(reason)) => {
                    assert_eq!(reason.kind, CancelKind::ScopeEnded);
                }
                other => panic!("expected a cancelled task, got {other:?}"),
            }
        }
    });
    test_complete!("cancel_all_on_five_handles_leaves_nothing_running");
}

#[test]
fn dropping_registry_cancels_outstanding_work() {
    init_test("dropping_registry_cancels_outstanding_work");
    run_test_with_cx(|cx| async move {
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicUsize::new(0));
        let registry = TaskRegistry::new();
        let handle = {
            let (started, stopped) = (Arc::clone(&started), Arc::clone(&stopped));
            registry
                .spawn(&cx, move |cx| async move {
                    started.store(true, Ordering::SeqCst);
                    let slept = cx.sleep(Duration::from_secs(60)).await;
                    stopped.fetch_add(1, Ordering::SeqCst);
                    slept
                })
                .expect("spawn")
        };

        test_section!("wait until the body is running");
        while !started.load(Ordering::SeqCst) {
            cx.yield_now().await.expect("yield");
        }
        drop(registry);
        assert!(handle.is_cancel_requested());

        let slept = handle.await.expect("body ran to completion");
        let reason = slept.unwrap_err().cancel_reason().map(|r| r.kind);
        assert_eq!(reason, Some(CancelKind::ScopeEnded));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    });
    test_complete!("dropping_registry_cancels_outstanding_work");
}

#[test]
fn cancel_reaches_work_left_behind_by_finished_task() {
    init_test("cancel_reaches_work_left_behind_by_finished_task");
    run_test_with_cx(|cx| async move {
        let scope = cx.child();
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);

        let parent = scope
            .spawn(move |pcx| async move {
                pcx.spawn(move |ccx| async move {
                    let slept = ccx.sleep(Duration::from_secs(60)).await;
                    seen.store(slept.is_err(), Ordering::SeqCst);
                    slept
                })
            })
            .expect("spawn parent");
        let child = parent.await.expect("parent joined").expect("child spawned");
        assert_eq!(child.state(), TaskState::Running);

        test_section!("cancel the scope after the parent finished");
        scope.cancel(taskweave::CancelReason::user("screen closed"));
        let slept = child.await.expect("child ran to completion");
        assert_eq!(
            slept.unwrap_err().cancel_reason().map(|r| r.kind),
            Some(CancelKind::ParentCancelled)
        );
        assert_with_log!(
            observed.load(Ordering::SeqCst),
            "grandchild observed the cancel",
            true,
            observed.load(Ordering::SeqCst)
        );
    });
    test_complete!("cancel_reaches_work_left_behind_by_finished_task");
}

#[test]
fn finished_handles_are_not_tracked() {
    run_test_with_cx(|cx| async move {
        let registry = TaskRegistry::new();
        let mut handle = cx.spawn(|_cx| async move { 5u8 }).expect("spawn");
        let value = handle.join(&cx).await.expect("join");
        assert_eq!(value, 5);
        assert!(!registry.track(&handle));
        assert!(registry.is_empty());
        assert_eq!(registry.cancel_all(), 0);
    });
}

#[test]
fn prune_forgets_finished_tasks() {
    run_test_with_cx(|cx| async move {
        let registry = TaskRegistry::new();
        let quick = registry
            .spawn(&cx, |_cx| async move { Ok::<_, Error>(()) })
            .expect("spawn");
        let slow = registry
            .spawn(&cx, |cx| async move { cx.sleep(Duration::from_secs(60)).await })
            .expect("spawn");
        let _ = quick.await;
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.cancel_all(), 1);
        let _ = slow.await;
    });
}

#[test]
fn cancel_after_times_out_handle() {
    run_test_with_cx(|cx| async move {
        let handle = cx
            .spawn(|cx| async move { cx.sleep(Duration::from_secs(60)).await })
            .expect("spawn");
        handle.cancel_after(Duration::from_millis(10));
        match handle.await {
            Ok(Err(err)) => assert!(err.is_timeout()),
            Err(JoinError::Cancelled(reason)) => assert!(reason.is_timeout()),
            other => panic!("expected a timeout, got {other:?}"),
        }
    });
}
