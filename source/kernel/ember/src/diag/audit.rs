// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Whole-kernel consistency audit used by tests and debug assertions.

use alloc::collections::BTreeMap;

use ember_abi::{EnvId, EnvStatus, VirtAddr};

use crate::kernel::{Kernel, KernelState};
use crate::mm::FrameId;
use crate::types::CpuId;

/// First inconsistency found by [`KernelState::audit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditError {
    /// A running environment is current on more than one CPU.
    DoubleDispatch { env: EnvId },
    /// A running environment is not current on any CPU.
    RunningUnowned { env: EnvId },
    /// A CPU's current environment is marked running elsewhere.
    StaleCurrent { cpu: CpuId, env: EnvId },
    /// A page is both copy-on-write and writable.
    WritableCow { env: EnvId, va: VirtAddr },
    /// A frame's reference count disagrees with the entries pointing at it.
    RefCount { frame: FrameId, counted: u32, recorded: u32 },
    /// A referenced frame also sits on the free list, or vice versa.
    FreeList { free: usize, unreferenced: usize },
}

impl Kernel {
    pub fn audit(&self) -> Result<(), AuditError> {
        self.lock().audit()
    }
}

impl KernelState {
    /// Checks CPU ownership of running environments, COW consistency, and frame counts.
    pub fn audit(&self) -> Result<(), AuditError> {
        for env in self.envs.iter().filter(|env| env.status == EnvStatus::Running) {
            let owners = self.cpus.iter().filter(|cpu| cpu.current == Some(env.id)).count();
            match owners {
                0 => return Err(AuditError::RunningUnowned { env: env.id }),
                1 => {}
                _ => return Err(AuditError::DoubleDispatch { env: env.id }),
            }
            if env.cpu.is_some_and(|cpu| self.cpu(cpu).current != Some(env.id)) {
                let cpu = env.cpu.unwrap_or(CpuId::BOOT);
                return Err(AuditError::StaleCurrent { cpu, env: env.id });
            }
        }

        let mut counted: BTreeMap<FrameId, u32> = BTreeMap::new();
        for env in self.envs.iter() {
            let Some(space) = env.space.as_ref() else {
                continue;
            };
            for frame in space.table_frames() {
                *counted.entry(frame).or_default() += 1;
            }
            for (va, pte) in space.iter() {
                if !pte.flags.is_cow_consistent() {
                    return Err(AuditError::WritableCow { env: env.id, va });
                }
                *counted.entry(pte.frame).or_default() += 1;
            }
        }

        let mut unreferenced = 0;
        for raw in 0..self.frames.capacity() as u32 {
            let frame = FrameId::from_raw(raw);
            let recorded = self.frames.refs(frame);
            let counted = counted.get(&frame).copied().unwrap_or(0);
            if recorded != counted {
                return Err(AuditError::RefCount { frame, counted, recorded });
            }
            if recorded == 0 {
                unreferenced += 1;
            }
        }
        let free = self.frames.free_count();
        if free != unreferenced {
            return Err(AuditError::FreeList { free, unreferenced });
        }
        Ok(())
    }
}
