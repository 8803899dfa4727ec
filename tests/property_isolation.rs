#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use taskweave::sync::IsolationDomain;
use taskweave::FanOut;

#[derive(Debug, Clone, Copy)]
enum Op {
    Push(u8),
    Pop,
    Double,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u8>().prop_map(Op::Push), Just(Op::Pop), Just(Op::Double)]
}

/// Applies `op` and returns a fingerprint of what it observed.
fn apply(stack: &mut Vec<u32>, op: Op) -> Option<u32> {
    match op {
        Op::Push(n) => {
            stack.push(u32::from(n));
            None
        }
        Op::Pop => stack.pop(),
        Op::Double => {
            for v in stack.iter_mut() {
                *v = v.wrapping_mul(2);
            }
            Some(stack.len() as u32)
        }
    }
}

proptest! {
    #![proptest_config(test_proptest_config(32))]

    /// Concurrent operations leave the state equal to replaying them in the
    /// order they actually entered the domain.
    #[test]
    fn concurrent_history_is_a_serial_interleaving(ops in prop::collection::vec(op(), 0..48)) {
        init_test_logging();
        let (journal, final_state) = run_test_with_cx(|cx| {
            let ops = ops.clone();
            async move {
                let domain = Arc::new(IsolationDomain::new((
                    Vec::<u32>::new(),
                    Vec::<(Op, Option<u32>)>::new(),
                )));
                let shared = Arc::clone(&domain);
                FanOut::all_succeed()
                    .max_concurrency(8)
                    .run(&cx, ops, move |cx, op| {
                        let domain = Arc::clone(&shared);
                        async move {
                            domain
                                .run(&cx, |(stack, journal)| {
                                    let seen = apply(stack, op);
                                    journal.push((op, seen));
                                })
                                .await
                        }
                    })
                    .await
                    .expect("fan-out");
                let (stack, journal) = domain
                    .run(&cx, |(stack, journal)| (stack.clone(), journal.clone()))
                    .await
                    .expect("read back");
                (journal, stack)
            }
        });

        prop_assert_eq!(journal.len(), ops.len());
        let mut replay = Vec::new();
        for (op, seen) in &journal {
            prop_assert_eq!(apply(&mut replay, *op), *seen);
        }
        prop_assert_eq!(replay, final_state);
    }
}
