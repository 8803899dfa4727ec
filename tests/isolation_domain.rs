#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave::sync::IsolationDomain;
use taskweave::{CancelReason, ErrorKind};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

#[test]
fn counter_increments_from_many_tasks_are_serialized() {
    init_test("counter_increments_from_many_tasks_are_serialized");
    run_test_with_cx(|cx| async move {
        let domain = Arc::new(IsolationDomain::new(0u64).named("counter"));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let domain = Arc::clone(&domain);
            handles.push(
                cx.spawn(move |cx| async move {
                    for _ in 0..50 {
                        domain.run(&cx, |n| *n += 1).await?;
                        cx.yield_now().await?;
                    }
                    Ok::<(), taskweave::Error>(())
                })
                .expect("spawn"),
            );
        }
        for handle in handles {
            handle.await.expect("joined").expect("ran");
        }
        let total = domain.run(&cx, |n| *n).await.expect("run");
        assert_with_log!(total == 1600, "every increment applied", 1600, total);
    });
    test_complete!("counter_increments_from_many_tasks_are_serialized");
}

#[test]
fn cache_with_exempt_config() {
    init_test("cache_with_exempt_config");
    run_test_with_cx(|cx| async move {
        let cache = IsolationDomain::with_exempt(HashMap::<String, Vec<u8>>::new(), 128usize)
            .named("image-cache");

        cache
            .run(&cx, |map| map.insert("a.png".into(), vec![1, 2, 3]))
            .await
            .expect("insert");
        let hit = cache
            .run(&cx, |map| map.get("a.png").cloned())
            .await
            .expect("lookup");
        assert_eq!(hit, Some(vec![1, 2, 3]));
        assert_eq!(*cache.exempt(), 128);
        assert!(!cache.is_busy());
    });
}

#[test]
fn cancelled_waiter_leaves_queue() {
    init_test("cancelled_waiter_leaves_queue");
    run_test_with_cx(|cx| async move {
        let domain = Arc::new(IsolationDomain::new(()));
        let release = Arc::new(AtomicBool::new(false));

        test_section!("hold the domain from a worker thread");
        let holder = {
            let domain = Arc::clone(&domain);
            let release = Arc::clone(&release);
            cx.spawn(move |cx| async move {
                domain
                    .run(&cx, |()| {
                        while !release.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    })
                    .await
            })
            .expect("spawn")
        };
        while !domain.is_busy() {
            cx.yield_now().await.expect("yield");
        }

        test_section!("queue a waiter and cancel it");
        let waiter_scope = cx.child();
        let waiter = {
            let domain = Arc::clone(&domain);
            waiter_scope
                .spawn(move |cx| async move { domain.run(&cx, |()| ()).await })
                .expect("spawn")
        };
        while domain.waiters() == 0 {
            cx.yield_now().await.expect("yield");
        }
        waiter_scope.cancel(CancelReason::user("navigated away"));
        match waiter.await {
            Ok(Err(err)) => assert_eq!(err.kind(), ErrorKind::Cancelled),
            Err(join) => assert!(join.is_cancelled()),
            Ok(Ok(())) => panic!("cancelled waiter must not run"),
        }
        assert_eq!(domain.waiters(), 0);

        release.store(true, Ordering::SeqCst);
        holder.await.expect("joined").expect("ran");
        domain.run(&cx, |()| ()).await.expect("domain still usable");
    });
}

#[test]
fn waiters_never_block_worker_threads() {
    init_test("waiters_never_block_worker_threads");
    run_test_with_cx(|cx| async move {
        // More waiters than workers: if waiting blocked a thread the
        // unrelated task below could never run.
        let domain = Arc::new(IsolationDomain::new(0u32));
        let guard_released = Arc::new(AtomicBool::new(false));
        let unrelated_ran = Arc::new(AtomicUsize::new(0));

        let holder = {
            let domain = Arc::clone(&domain);
            let flag = Arc::clone(&guard_released);
            cx.spawn(move |cx| async move {
                domain
                    .run(&cx, |_| {
                        while !flag.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    })
                    .await
            })
            .expect("spawn")
        };
        while !domain.is_busy() {
            cx.yield_now().await.expect("yield");
        }

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let domain = Arc::clone(&domain);
            waiters.push(
                cx.spawn(move |cx| async move { domain.run(&cx, |n| *n += 1).await })
                    .expect("spawn"),
            );
        }
        let ran = Arc::clone(&unrelated_ran);
        let unrelated = cx
            .spawn(move |_cx| async move {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn");
        unrelated.await.expect("unrelated task ran");
        assert_eq!(unrelated_ran.load(Ordering::SeqCst), 1);

        guard_released.store(true, Ordering::SeqCst);
        holder.await.expect("joined").expect("ran");
        for waiter in waiters {
            waiter.await.expect("joined").expect("ran");
        }
        assert_eq!(domain.run(&cx, |n| *n).await.expect("run"), 8);
    });
}
