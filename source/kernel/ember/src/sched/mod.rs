// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Round-robin scheduling decision over the environment table
//! OWNERS: @kernel-sched-team
//! PUBLIC API: decide(envs, last, monitor_on_idle) -> Decision
//! DEPENDS_ON: env::EnvTable
//! INVARIANTS: The scan starts right after the CPU's last environment and wraps once;
//!             the last environment is re-chosen only when still running on this CPU;
//!             pure function of the table (callers apply the decision under the kernel lock)

use ember_abi::EnvStatus;

use crate::env::EnvTable;

/// What a CPU should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch the environment in this slot.
    Run(usize),
    /// Idle until the next interrupt.
    Halt,
    /// Nothing can ever run again; enter the kernel monitor.
    Monitor,
}

/// Picks the next environment for a CPU whose last environment sat in slot `last`.
pub fn decide(envs: &EnvTable, last: Option<usize>, monitor_on_idle: bool) -> Decision {
    let n = envs.len();
    let start = last.map_or(0, |index| index + 1);
    for step in 0..n {
        let index = (start + step) % n;
        if envs.get(index).is_some_and(|env| env.status == EnvStatus::Runnable) {
            return Decision::Run(index);
        }
    }

    if let Some(index) = last {
        if envs.get(index).is_some_and(|env| env.status == EnvStatus::Running) {
            return Decision::Run(index);
        }
    }

    if monitor_on_idle && !envs.iter().any(|env| can_make_progress(env.status)) {
        return Decision::Monitor;
    }
    Decision::Halt
}

fn can_make_progress(status: EnvStatus) -> bool {
    matches!(status, EnvStatus::Runnable | EnvStatus::Running | EnvStatus::Dying)
}

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_prop;
