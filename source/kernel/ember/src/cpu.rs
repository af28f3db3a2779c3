// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-CPU records.

use ember_abi::{EnvId, PAGE_SIZE};

use crate::types::CpuId;

/// Top of the boot CPU's kernel stack.
pub const KSTACKTOP: usize = 0xf000_0000;
/// Size of one per-CPU kernel stack.
pub const KSTKSIZE: usize = 8 * PAGE_SIZE;
/// Unmapped guard between consecutive kernel stacks.
pub const KSTKGAP: usize = 8 * PAGE_SIZE;

/// Lifecycle of a CPU as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStatus {
    /// Not brought up yet.
    Unused,
    /// Running kernel or user code.
    Started,
    /// Idling until the next interrupt.
    Halted,
}

/// Per-CPU state protected by the kernel lock.
#[derive(Clone, Debug)]
pub struct Cpu {
    pub id: CpuId,
    pub status: CpuStatus,
    /// Environment currently dispatched on this CPU.
    pub current: Option<EnvId>,
}

impl Cpu {
    pub(crate) const fn new(id: CpuId) -> Self {
        Self { id, status: CpuStatus::Unused, current: None }
    }

    /// Top of this CPU's kernel stack; stacks grow down below [`KSTACKTOP`].
    pub const fn kstack_top(&self) -> usize {
        KSTACKTOP - self.id.as_index() * (KSTKSIZE + KSTKGAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stacks_are_separated_by_guard_gap() {
        let boot = Cpu::new(CpuId::BOOT);
        let second = Cpu::new(CpuId::from_raw(1));
        assert_eq!(boot.kstack_top(), KSTACKTOP);
        assert_eq!(boot.kstack_top() - second.kstack_top(), KSTKSIZE + KSTKGAP);
    }
}
