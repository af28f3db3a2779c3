// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Saved register state and the user exception frame.

use core::mem::size_of;

use static_assertions::const_assert_eq;

use crate::flags::FaultCause;
use crate::ids::VirtAddr;

/// Debug exception (single-step).
pub const T_DEBUG: u32 = 1;
/// Breakpoint.
pub const T_BRKPT: u32 = 3;
/// Page fault.
pub const T_PGFLT: u32 = 14;
/// First vector of external interrupts.
pub const IRQ_OFFSET: u32 = 32;
/// Timer interrupt.
pub const IRQ_TIMER: u32 = IRQ_OFFSET;
/// System call.
pub const T_SYSCALL: u32 = 48;

/// Trap flag: single-step after the next instruction.
pub const FL_TF: u32 = 0x0000_0100;
/// Interrupt enable flag.
pub const FL_IF: u32 = 0x0000_0200;

/// General-purpose registers in push order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PushRegs {
    /// EDI.
    pub edi: u32,
    /// ESI.
    pub esi: u32,
    /// EBP.
    pub ebp: u32,
    /// Unused slot (saved ESP of the push).
    pub oesp: u32,
    /// EBX.
    pub ebx: u32,
    /// EDX.
    pub edx: u32,
    /// ECX.
    pub ecx: u32,
    /// EAX: syscall number on entry, return value on exit.
    pub eax: u32,
}

const_assert_eq!(size_of::<PushRegs>(), 32);

impl PushRegs {
    fn words(&self) -> [u32; 8] {
        [self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax]
    }
}

/// Register state saved on kernel entry and restored on dispatch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// General-purpose registers.
    pub regs: PushRegs,
    /// Trap number that caused the last kernel entry.
    pub trapno: u32,
    /// Hardware error code for the trap.
    pub err: u32,
    /// Instruction pointer.
    pub eip: u32,
    /// Flags register.
    pub eflags: u32,
    /// Stack pointer.
    pub esp: u32,
}

impl TrapFrame {
    /// Fresh user frame with interrupts enabled.
    pub const fn user(entry: u32, stack_top: u32) -> Self {
        Self {
            regs: PushRegs { edi: 0, esi: 0, ebp: 0, oesp: 0, ebx: 0, edx: 0, ecx: 0, eax: 0 },
            trapno: 0,
            err: 0,
            eip: entry,
            eflags: FL_IF,
            esp: stack_top,
        }
    }

    /// Value the environment observes as its syscall return.
    #[inline]
    pub const fn syscall_return(&self) -> u32 {
        self.regs.eax
    }

    /// Sets the value the environment observes as its syscall return.
    #[inline]
    pub fn set_syscall_return(&mut self, value: u32) {
        self.regs.eax = value;
    }

    /// Arms or clears single-step execution.
    pub fn set_single_step(&mut self, on: bool) {
        if on {
            self.eflags |= FL_TF;
        } else {
            self.eflags &= !FL_TF;
        }
    }

    /// True when single-step execution is armed.
    #[inline]
    pub const fn is_single_step(&self) -> bool {
        self.eflags & FL_TF != 0
    }

    /// True when the frame was saved by a breakpoint or debug trap.
    #[inline]
    pub const fn is_debug_stop(&self) -> bool {
        self.trapno == T_BRKPT || self.trapno == T_DEBUG
    }
}

/// Frame the kernel pushes on the user exception stack before a page-fault upcall.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address.
    pub fault_va: VirtAddr,
    /// Fault cause bits.
    pub err: FaultCause,
    /// Registers at the time of the fault.
    pub regs: PushRegs,
    /// Faulting instruction pointer.
    pub eip: u32,
    /// Flags at the time of the fault.
    pub eflags: u32,
    /// Stack pointer at the time of the fault.
    pub esp: u32,
}

impl UTrapframe {
    /// Number of 32-bit words in the on-stack representation.
    pub const WORDS: usize = 13;
    /// Size of the on-stack representation in bytes.
    pub const SIZE: usize = Self::WORDS * 4;

    /// Serialises the frame in stack order (lowest address first).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let regs = self.regs.words();
        let words: [u32; Self::WORDS] = [
            self.fault_va.raw() as u32,
            self.err.bits(),
            regs[0],
            regs[1],
            regs[2],
            regs[3],
            regs[4],
            regs[5],
            regs[6],
            regs[7],
            self.eip,
            self.eflags,
            self.esp,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_toggles_only_trap_flag() {
        let mut tf = TrapFrame::user(0x0080_0020, 0xeebf_e000);
        tf.set_single_step(true);
        assert!(tf.is_single_step());
        assert_eq!(tf.eflags, FL_IF | FL_TF);
        tf.set_single_step(false);
        assert_eq!(tf.eflags, FL_IF);
    }

    #[test]
    fn utrapframe_layout_puts_fault_va_first() {
        let utf = UTrapframe {
            fault_va: VirtAddr::new(0x0080_1004),
            err: FaultCause::WRITE | FaultCause::USER,
            esp: 0xeebf_dff0,
            ..UTrapframe::default()
        };
        let bytes = utf.to_bytes();
        assert_eq!(&bytes[0..4], &0x0080_1004u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &6u32.to_le_bytes());
        assert_eq!(&bytes[48..52], &0xeebf_dff0u32.to_le_bytes());
    }
}
