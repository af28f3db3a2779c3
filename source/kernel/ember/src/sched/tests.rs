// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for the round-robin decision
//! OWNERS: @kernel-sched-team

use ember_abi::EnvStatus;

use super::{decide, Decision};
use crate::env::EnvTable;
use crate::mm::FrameAllocator;

/// Table with `statuses.len()` live environments in the given states.
fn table(statuses: &[EnvStatus], slots: usize) -> EnvTable {
    let mut frames = FrameAllocator::new(64);
    let mut envs = EnvTable::new(slots);
    for &status in statuses {
        let index = envs.alloc(&mut frames, None).expect("alloc");
        if let Some(env) = envs.get_mut(index) {
            env.status = status;
        }
    }
    envs
}

#[test]
fn continues_after_last_environment() {
    use EnvStatus::*;
    let envs = table(&[Runnable, Running, Runnable, Runnable], 8);
    assert_eq!(decide(&envs, Some(1), false), Decision::Run(2));
    assert_eq!(decide(&envs, Some(3), false), Decision::Run(0));
}

#[test]
fn skips_dying_environment_in_circular_scan() {
    use EnvStatus::*;
    let envs = table(&[Runnable, Running, Dying, Runnable], 4);
    assert_eq!(decide(&envs, Some(1), false), Decision::Run(3));

    let envs = table(&[Runnable, Running, Dying, NotRunnable], 4);
    assert_eq!(decide(&envs, Some(1), false), Decision::Run(0));
}

#[test]
fn starts_at_slot_zero_without_history() {
    use EnvStatus::*;
    let envs = table(&[NotRunnable, Runnable], 4);
    assert_eq!(decide(&envs, None, false), Decision::Run(1));
}

#[test]
fn keeps_running_environment_when_alone() {
    use EnvStatus::*;
    let envs = table(&[NotRunnable, Running], 4);
    assert_eq!(decide(&envs, Some(1), true), Decision::Run(1));
}

#[test]
fn running_elsewhere_is_not_reselected() {
    use EnvStatus::*;
    // Slot 0 runs on another CPU; this CPU's last env (slot 1) blocked.
    let envs = table(&[Running, NotRunnable], 4);
    assert_eq!(decide(&envs, Some(1), true), Decision::Halt);
}

#[test]
fn blocked_system_enters_monitor_when_enabled() {
    use EnvStatus::*;
    let envs = table(&[NotRunnable, NotRunnable], 4);
    assert_eq!(decide(&envs, Some(0), true), Decision::Monitor);
    assert_eq!(decide(&envs, Some(0), false), Decision::Halt);
}

#[test]
fn dying_environment_keeps_cpu_halted_not_in_monitor() {
    use EnvStatus::*;
    let envs = table(&[Dying, NotRunnable], 4);
    assert_eq!(decide(&envs, None, true), Decision::Halt);
}

#[test]
fn empty_table_enters_monitor() {
    let envs = table(&[], 4);
    assert_eq!(decide(&envs, None, true), Decision::Monitor);
}
