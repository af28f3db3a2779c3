// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel monitor plumbing: resume requests and page-mapping inspection
//! OWNERS: @kernel-team
//! STATUS: Functional (command parsing belongs to the `Console` implementation)
//! PUBLIC API: Console, Resume, MonitorError, run, resume, show_mappings, set_mappings_perm,
//!             MappingLine
//! INVARIANTS: Continue/step only resume an environment stopped by a breakpoint or
//!             debug trap; step arms the trap flag, continue clears it

use alloc::vec::Vec;
use core::fmt;

use ember_abi::{EnvId, PageFlags, SysError, VirtAddr};

use crate::kernel::{Dispatch, Kernel};
use crate::mm::FrameId;
use crate::types::CpuId;

/// How to leave the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resume {
    /// Resume the stopped environment normally.
    Continue,
    /// Resume for exactly one instruction.
    Step,
}

/// Why a resume request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorError {
    /// No environment is current on this CPU.
    NoTrapFrame,
    /// The current environment did not stop on a breakpoint or debug trap.
    NotStopped { trapno: u32 },
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTrapFrame => f.write_str("no trapframe"),
            Self::NotStopped { trapno } => write!(f, "not stopped at a breakpoint (trap {trapno})"),
        }
    }
}

/// Source of monitor commands.
pub trait Console {
    /// Reads and executes one command. Returns `Some` when the operator asks to resume.
    fn step(&mut self, kernel: &Kernel, cpu: CpuId) -> Option<Resume>;
}

/// Runs `console` until it asks to resume, then resumes.
///
/// A refused resume ends the session with the error, leaving the caller to decide
/// whether to re-enter.
pub fn run<C: Console + ?Sized>(
    kernel: &Kernel,
    cpu: CpuId,
    console: &mut C,
) -> Result<Dispatch, MonitorError> {
    loop {
        if let Some(how) = console.step(kernel, cpu) {
            return resume(kernel, cpu, how);
        }
    }
}

/// Resumes the environment current on `cpu` with the trap flag set for [`Resume::Step`].
pub fn resume(kernel: &Kernel, cpu: CpuId, how: Resume) -> Result<Dispatch, MonitorError> {
    let mut state = kernel.lock();
    let index = state.current_index(cpu).ok_or(MonitorError::NoTrapFrame)?;
    let frame = &mut state.envs[index].frame;
    if !frame.is_debug_stop() {
        log_warn!(target: "monitor", "cannot resume: trap {}", frame.trapno);
        return Err(MonitorError::NotStopped { trapno: frame.trapno });
    }
    frame.set_single_step(how == Resume::Step);
    Ok(state.env_run(cpu, index))
}

/// One line of `showmappings` output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingLine {
    pub va: VirtAddr,
    pub frame: FrameId,
    pub flags: PageFlags,
}

impl fmt::Display for MappingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} {}", self.va, self.frame, self.flags)
    }
}

/// Mapped pages of `env` in `[start, end]` (inclusive of the page holding `end`).
pub fn show_mappings(
    kernel: &Kernel,
    env: EnvId,
    start: VirtAddr,
    end: VirtAddr,
) -> Result<Vec<MappingLine>, SysError> {
    let end = end.page_down().checked_add(ember_abi::PAGE_SIZE).unwrap_or(end);
    Ok(kernel
        .mappings(env, start.page_down(), end)?
        .into_iter()
        .map(|(va, pte)| MappingLine { va, frame: pte.frame, flags: pte.flags })
        .collect())
}

/// Rewrites the flags of every mapped page of `env` in `[start, end]`.
///
/// Unmapped pages in the range are skipped. Returns the number of entries changed.
pub fn set_mappings_perm(
    kernel: &Kernel,
    env: EnvId,
    start: VirtAddr,
    end: VirtAddr,
    perm: PageFlags,
) -> Result<usize, SysError> {
    let lines = show_mappings(kernel, env, start, end)?;
    for line in &lines {
        kernel.set_mapping_perm(env, line.va, perm)?;
    }
    Ok(lines.len())
}
