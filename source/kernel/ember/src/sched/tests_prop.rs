// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for round-robin fairness
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - With a fixed set of runnable environments, consecutive decisions visit each
//!     exactly once per round, in circular table order
//!   - A decision never selects a non-runnable slot other than the CPU's own running env
//!
//! TEST_SCENARIOS:
//!   - full_round_visits_everyone_once(): n decisions from any start cover all n envs
//!   - never_selects_blocked_or_free(): random statuses, decision is Runnable or the
//!     running last slot

use std::collections::BTreeSet;

use ember_abi::EnvStatus;
use proptest::prelude::*;

use super::{decide, Decision};
use crate::env::EnvTable;
use crate::mm::FrameAllocator;

fn arb_status() -> impl Strategy<Value = EnvStatus> {
    prop_oneof![
        Just(EnvStatus::Runnable),
        Just(EnvStatus::NotRunnable),
        Just(EnvStatus::Dying),
        Just(EnvStatus::Free),
    ]
}

fn runnable_table(n: usize, slots: usize) -> EnvTable {
    let mut frames = FrameAllocator::new(2 * slots + 2);
    let mut envs = EnvTable::new(slots);
    for _ in 0..n {
        envs.alloc(&mut frames, None).expect("alloc");
    }
    envs
}

proptest! {
    #[test]
    fn full_round_visits_everyone_once(n in 1usize..24, extra in 0usize..8, start in 0usize..32) {
        let slots = n + extra;
        let envs = runnable_table(n, slots);
        let mut last = Some(start % slots);
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        for _ in 0..n {
            let Decision::Run(index) = decide(&envs, last, true) else {
                return Err(TestCaseError::fail("runnable env not chosen"));
            };
            seen.insert(index);
            order.push(index);
            last = Some(index);
        }
        prop_assert_eq!(seen.len(), n);
        for pair in order.windows(2) {
            prop_assert_eq!(pair[1], (pair[0] + 1) % n);
        }
    }

    #[test]
    fn never_selects_blocked_or_free(
        statuses in proptest::collection::vec(arb_status(), 1..16),
        last_running in any::<bool>(),
        last in 0usize..16,
    ) {
        let slots = statuses.len();
        let mut frames = FrameAllocator::new(2 * slots + 2);
        let mut envs = EnvTable::new(slots);
        for &status in &statuses {
            let index = envs.alloc(&mut frames, None).expect("alloc");
            if status == EnvStatus::Free {
                envs.free(&mut frames, index);
            } else if let Some(env) = envs.get_mut(index) {
                env.status = status;
            }
        }
        let last = last % slots;
        if last_running && !envs.get(last).is_some_and(|env| env.is_free()) {
            if let Some(env) = envs.get_mut(last) {
                env.status = EnvStatus::Running;
            }
        }
        match decide(&envs, Some(last), true) {
            Decision::Run(index) => {
                let status = envs.get(index).map(|env| env.status);
                prop_assert!(
                    status == Some(EnvStatus::Runnable)
                        || (index == last && status == Some(EnvStatus::Running))
                );
            }
            Decision::Halt | Decision::Monitor => {
                prop_assert!(!envs.iter().any(|env| env.status == EnvStatus::Runnable));
            }
        }
    }
}
