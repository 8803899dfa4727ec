#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use taskweave::bridge::{bridge, bridge_value, Bridge, Continuation};
use taskweave::runtime::ViolationResponse;
use taskweave::{CancelReason, ErrorKind};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

/// Stand-in for a callback-based client that completes on its own thread.
struct LegacyClient;

impl LegacyClient {
    fn fetch<F>(&self, url: &'static str, delay: Duration, done: F)
    where
        F: FnOnce(Result<String, Boom>) + Send + 'static,
    {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if url.ends_with("/missing") {
                done(Err(Boom("404")));
            } else {
                done(Ok(format!("body of {url}")));
            }
        });
    }
}

#[test]
fn callback_becomes_await() {
    init_test("callback_becomes_await");
    run_test_with_cx(|cx| async move {
        let client = LegacyClient;
        let body = bridge(&cx, |k: Continuation<String, Boom>| {
            client.fetch("https://example.test/a", Duration::from_millis(5), move |r| {
                k.resume_with(r);
            });
        })
        .await
        .expect("resumed");
        assert_eq!(body, "body of https://example.test/a");

        let err = bridge(&cx, |k: Continuation<String, Boom>| {
            client.fetch("https://example.test/missing", Duration::ZERO, move |r| {
                k.resume_with(r);
            });
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.downcast_upstream::<Boom>(), Some(&Boom("404")));
    });
    test_complete!("callback_becomes_await");
}

#[test]
fn bridged_calls_from_many_tasks() {
    init_test("bridged_calls_from_many_tasks");
    run_test_with_cx(|cx| async move {
        let mut handles = Vec::new();
        for i in 0..16u64 {
            handles.push(
                cx.spawn(move |cx| async move {
                    bridge_value(&cx, move |k: Continuation<u64>| {
                        std::thread::spawn(move || {
                            std::thread::sleep(Duration::from_millis(16 - i));
                            k.resume(i * i);
                        });
                    })
                    .await
                })
                .expect("spawn"),
            );
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("joined").expect("resumed"));
        }
        assert_eq!(results, (0..16u64).map(|i| i * i).collect::<Vec<_>>());
    });
}

#[test]
fn double_resume_is_reported_not_delivered() {
    init_test("double_resume_is_reported_not_delivered");
    run_test_with_cx(|cx| async move {
        let second = Arc::new(Mutex::new(None));
        let record = Arc::clone(&second);
        let value = Bridge::new()
            .label("chatty-callback")
            .violation_response(ViolationResponse::Log)
            .run(&cx, move |k: Continuation<u8, Boom>| {
                let shared = k.share();
                std::thread::spawn(move || {
                    let again = shared.clone();
                    let _ = shared.resume(1);
                    *record.lock() = Some(again.resume(2));
                });
            })
            .await
            .expect("first resume wins");
        assert_eq!(value, 1);

        // The callback thread may still be recording its second attempt.
        let outcome = loop {
            if let Some(outcome) = second.lock().take() {
                break outcome;
            }
            cx.yield_now().await.expect("yield");
        };
        let err = outcome.unwrap_err();
        assert!(err.is_protocol_violation());
    });
}

#[test]
fn dropped_token_never_hangs() {
    init_test("dropped_token_never_hangs");
    run_test_with_cx(|cx| async move {
        let err = assert_completes_within(
            &cx,
            Duration::from_secs(5),
            "bridge with dropped token",
            bridge_value(&cx, |k: Continuation<()>| {
                std::thread::spawn(move || drop(k));
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    });
}

#[test]
fn cancelled_bridge_discards_late_resume() {
    init_test("cancelled_bridge_discards_late_resume");
    run_test_with_cx(|cx| async move {
        let scope = cx.child();
        let parked = Arc::new(Mutex::new(None));
        let store = Arc::clone(&parked);
        let waiter = scope
            .spawn(move |cx| async move {
                bridge_value(&cx, move |k: Continuation<u8>| {
                    *store.lock() = Some(k);
                })
                .await
            })
            .expect("spawn");

        while parked.lock().is_none() {
            cx.yield_now().await.expect("yield");
        }
        scope.cancel(CancelReason::user("request abandoned"));
        match waiter.await {
            Ok(result) => assert!(result.unwrap_err().is_cancelled()),
            Err(join) => assert!(join.is_cancelled()),
        }

        let late = parked.lock().take().expect("parked");
        assert!(late.is_abandoned());
        late.resume(3);
    });
}
