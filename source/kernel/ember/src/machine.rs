// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware seam: the few operations that leave the kernel for good.

use ember_abi::{EnvId, TrapFrame};

use crate::kernel::{Dispatch, Kernel};
use crate::types::CpuId;

/// Per-CPU hardware operations that never return to the caller.
///
/// Implementations are invoked with the kernel lock released.
pub trait Machine {
    /// Restores `frame` (address space of `env` loaded) and drops to user mode.
    fn run(&mut self, cpu: CpuId, env: EnvId, frame: &TrapFrame) -> !;

    /// Resets onto `kstack_top`, enables interrupts, and waits.
    fn halt(&mut self, cpu: CpuId, kstack_top: usize) -> !;

    /// Runs the interactive monitor, typically via [`crate::monitor::run`].
    fn monitor(&mut self, cpu: CpuId, kernel: &Kernel) -> !;

    /// Carries out a scheduling result.
    fn dispatch(&mut self, kernel: &Kernel, dispatch: Dispatch) -> ! {
        match dispatch {
            Dispatch::Run { cpu, env, frame } => self.run(cpu, env, &frame),
            Dispatch::Halt { cpu, kstack_top } => self.halt(cpu, kstack_top),
            Dispatch::Monitor { cpu } => self.monitor(cpu, kernel),
        }
    }
}
