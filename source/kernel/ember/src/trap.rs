// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap dispatch and user page-fault delivery
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel::{trap, page_fault, upcall_return}, FaultOutcome
//! DEPENDS_ON: kernel::KernelState, syscall
//! INVARIANTS: A fault is delivered only onto a writable exception-stack page with room for
//!             the frame; otherwise the faulting environment is destroyed. Nested faults
//!             stack below the current frame with one scratch word in between.

use ember_abi::layout::UXSTACKTOP;
use ember_abi::trap::{IRQ_TIMER, T_BRKPT, T_DEBUG, T_PGFLT, T_SYSCALL};
use ember_abi::{
    EnvId, FaultCause, PageFault, SysError, TrapFrame, UTrapframe, UpcallEntry, VirtAddr, PAGE_SIZE,
};

use crate::kernel::{Dispatch, Kernel, KernelState};
use crate::types::CpuId;

/// Bytes left free between nested exception frames.
const SCRATCH_WORD: usize = 4;

/// How a user page fault was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The frame was pushed on the exception stack; `frame` now enters `entry`.
    Upcall { env: EnvId, entry: UpcallEntry, utf: UTrapframe, frame: TrapFrame },
    /// The environment could not take the fault and was destroyed.
    Destroyed(Dispatch),
}

impl Kernel {
    /// Kernel entry for any trap taken from user mode on `cpu`.
    ///
    /// `fault_va` carries the faulting address for page faults.
    pub fn trap(&self, cpu: CpuId, tf: &TrapFrame, fault_va: VirtAddr) -> Dispatch {
        if tf.trapno == T_SYSCALL {
            return self.syscall_trap(cpu, tf);
        }
        let mut state = self.lock();
        if let Some(dispatch) = state.trap_enter(cpu, tf) {
            return dispatch;
        }
        match tf.trapno {
            T_PGFLT => {
                let cause = FaultCause::from_bits_truncate(tf.err);
                match state.page_fault(cpu, fault_va, cause) {
                    FaultOutcome::Upcall { env, frame, .. } => Dispatch::Run { cpu, env, frame },
                    FaultOutcome::Destroyed(dispatch) => dispatch,
                }
            }
            T_BRKPT | T_DEBUG => Dispatch::Monitor { cpu },
            IRQ_TIMER => state.schedule(cpu),
            trapno => {
                log_error!(target: "trap", "cpu{}: unexpected trap {} from user mode", cpu, trapno);
                match state.current_index(cpu) {
                    Some(index) => state.env_destroy(cpu, index).unwrap_or(Dispatch::Halt {
                        cpu,
                        kstack_top: state.cpu(cpu).kstack_top(),
                    }),
                    None => state.schedule(cpu),
                }
            }
        }
    }

    /// Delivers a user page fault of the environment current on `cpu`.
    pub fn page_fault(&self, cpu: CpuId, fault: PageFault) -> FaultOutcome {
        self.lock().page_fault(cpu, fault.va, fault.cause)
    }

    /// Restores the registers captured in `utf` once the upcall handler returns.
    pub fn upcall_return(&self, cpu: CpuId, utf: &UTrapframe) -> Result<(), SysError> {
        let mut state = self.lock();
        let index = state.current_index(cpu).ok_or(SysError::BadEnv)?;
        let frame = &mut state.envs[index].frame;
        frame.regs = utf.regs;
        frame.eip = utf.eip;
        frame.eflags = utf.eflags;
        frame.esp = utf.esp;
        Ok(())
    }
}

impl KernelState {
    pub(crate) fn page_fault(&mut self, cpu: CpuId, va: VirtAddr, cause: FaultCause) -> FaultOutcome {
        let Some(index) = self.current_index(cpu) else {
            log_error!(target: "trap", "cpu{}: page fault at {} with no current env", cpu, va);
            return FaultOutcome::Destroyed(self.schedule(cpu));
        };
        let env = &self.envs[index];
        let (id, tf) = (env.id, env.frame);
        let Some(entry) = env.pgfault_upcall else {
            log_error!(target: "trap", "[{}] user fault va {} ip {:08x}", id, va, tf.eip);
            return self.kill_faulting(cpu, index);
        };

        let base = match exception_frame_base(tf.esp as usize) {
            Some(base) => VirtAddr::new(base),
            None => {
                log_error!(target: "trap", "[{}] exception stack overflow at {}", id, va);
                return self.kill_faulting(cpu, index);
            }
        };
        let utf = UTrapframe {
            fault_va: va,
            err: cause,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        };
        let bytes = utf.to_bytes();
        if let Err(fault) = self.write_user(index, base, &bytes) {
            log_error!(
                target: "trap",
                "[{}] exception stack not writable at {} (fault va {})",
                id,
                fault.va,
                va
            );
            return self.kill_faulting(cpu, index);
        }

        let frame = &mut self.envs[index].frame;
        frame.trapno = T_PGFLT;
        frame.err = cause.bits();
        frame.eip = entry.addr().raw() as u32;
        frame.esp = base.raw() as u32;
        log_trace!(target: "trap", "[{}] pgfault upcall for {}", id, va);
        FaultOutcome::Upcall { env: id, entry, utf, frame: *frame }
    }

    fn kill_faulting(&mut self, cpu: CpuId, index: usize) -> FaultOutcome {
        let dispatch = match self.env_destroy(cpu, index) {
            Some(dispatch) => dispatch,
            None => self.schedule(cpu),
        };
        FaultOutcome::Destroyed(dispatch)
    }
}

/// Lowest address of the exception frame for a fault taken with stack pointer `esp`:
/// the top of the exception stack, or just below the current frame when already on it.
fn exception_frame_base(esp: usize) -> Option<usize> {
    let bottom = UXSTACKTOP - PAGE_SIZE;
    let top = if (bottom..UXSTACKTOP).contains(&esp) { esp - SCRATCH_WORD } else { UXSTACKTOP };
    let base = top.checked_sub(UTrapframe::SIZE)?;
    (base >= bottom).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fault_lands_at_top_of_exception_stack() {
        assert_eq!(exception_frame_base(0xeebf_d000), Some(UXSTACKTOP - UTrapframe::SIZE));
    }

    #[test]
    fn nested_fault_leaves_scratch_word() {
        let esp = UXSTACKTOP - UTrapframe::SIZE;
        assert_eq!(exception_frame_base(esp), Some(esp - SCRATCH_WORD - UTrapframe::SIZE));
    }

    #[test]
    fn overflow_is_rejected() {
        let esp = UXSTACKTOP - PAGE_SIZE + 8;
        assert_eq!(exception_frame_base(esp), None);
    }
}
