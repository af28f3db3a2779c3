// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment table: fixed arena of environment records with an O(1) free list
//! OWNERS: @kernel-env-team
//! STATUS: Functional
//! PUBLIC API: Env, IpcState, EnvTable (alloc/free/lookup/info)
//! DEPENDS_ON: mm::{AddressSpace, FrameAllocator}, ember_abi ids/status
//! INVARIANTS: Slot index never changes for a live record; ids gain a new generation on
//!             every reuse of a slot; Free slots own no address space

pub mod image;

#[cfg(test)]
mod tests;

use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use ember_abi::layout::USTACKTOP;
use ember_abi::{
    EnvId, EnvInfo, EnvStatus, EnvType, PageFlags, SysError, TrapFrame, UpcallEntry, VirtAddr,
};

use crate::mm::{AddressSpace, FrameAllocator};
use crate::types::CpuId;

/// Rendezvous state of an environment's IPC mailbox.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IpcState {
    /// Blocked in `ipc_recv`.
    pub recving: bool,
    /// Where the receiver wants a transferred page, if anywhere.
    pub dst: Option<VirtAddr>,
    pub value: u32,
    pub from: Option<EnvId>,
    /// Permission of the transferred page, empty when none was transferred.
    pub perm: PageFlags,
}

/// One slot of the environment table.
#[derive(Debug)]
pub struct Env {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub env_type: EnvType,
    pub status: EnvStatus,
    /// Dispatch count.
    pub runs: u32,
    /// CPU the environment last ran on.
    pub cpu: Option<CpuId>,
    /// Set to `NotRunnable` while executing; applied when its CPU next schedules.
    pub park_pending: bool,
    /// Saved registers while not executing.
    pub frame: TrapFrame,
    pub space: Option<AddressSpace>,
    pub pgfault_upcall: Option<UpcallEntry>,
    pub ipc: IpcState,
    next_free: Option<usize>,
}

impl Env {
    const fn vacant(next_free: Option<usize>) -> Self {
        Self {
            id: EnvId::CURRENT,
            parent: None,
            env_type: EnvType::User,
            status: EnvStatus::Free,
            runs: 0,
            cpu: None,
            park_pending: false,
            frame: TrapFrame::user(0, USTACKTOP as u32),
            space: None,
            pgfault_upcall: None,
            ipc: IpcState { recving: false, dst: None, value: 0, from: None, perm: PageFlags::empty() },
            next_free,
        }
    }

    /// Read-only snapshot as exposed to user space.
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent: self.parent,
            env_type: self.env_type,
            status: self.status,
            runs: self.runs,
            ipc_recving: self.ipc.recving,
            ipc_from: self.ipc.from,
            ipc_value: self.ipc.value,
            ipc_perm: self.ipc.perm,
            pgfault_upcall: self.pgfault_upcall,
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == EnvStatus::Free
    }
}

/// Fixed-capacity environment arena indexed by the low bits of an [`EnvId`].
pub struct EnvTable {
    envs: Vec<Env>,
    free_head: Option<usize>,
}

impl EnvTable {
    /// Creates `count` free slots, linked so that slot 0 is handed out first.
    pub fn new(count: usize) -> Self {
        let envs = (0..count)
            .map(|i| Env::vacant(if i + 1 < count { Some(i + 1) } else { None }))
            .collect();
        Self { envs, free_head: if count > 0 { Some(0) } else { None } }
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Env> {
        self.envs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Env> {
        self.envs.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env> + '_ {
        self.envs.iter()
    }

    /// Claims the first free slot for a new `Runnable` environment with an empty
    /// address space, returning its slot index.
    pub fn alloc(
        &mut self,
        frames: &mut FrameAllocator,
        parent: Option<EnvId>,
    ) -> Result<usize, SysError> {
        let index = self.free_head.ok_or(SysError::NoFreeEnv)?;
        let space = AddressSpace::new(frames)?;
        let env = &mut self.envs[index];
        self.free_head = env.next_free.take();

        let id = EnvId::next_generation(env.id, index);
        *env = Env::vacant(None);
        env.id = id;
        env.parent = parent;
        env.status = EnvStatus::Runnable;
        env.space = Some(space);
        log_debug!(target: "env", "[{}] new env {}", parent.unwrap_or(EnvId::CURRENT), id);
        Ok(index)
    }

    /// Releases slot `index` and everything its address space references.
    ///
    /// The slot keeps its id so the next occupant advances the generation.
    pub fn free(&mut self, frames: &mut FrameAllocator, index: usize) {
        let head = self.free_head;
        let Some(env) = self.envs.get_mut(index) else {
            return;
        };
        if env.is_free() {
            return;
        }
        if let Some(space) = env.space.take() {
            space.teardown(frames);
        }
        log_debug!(target: "env", "free env {}", env.id);
        env.status = EnvStatus::Free;
        env.cpu = None;
        env.park_pending = false;
        env.ipc = IpcState::default();
        env.pgfault_upcall = None;
        env.next_free = head;
        self.free_head = Some(index);
    }

    /// Resolves `id` to a slot index.
    ///
    /// `EnvId::CURRENT` names `caller`. With `check_perm`, the target must be the
    /// caller itself or one of its immediate children.
    pub fn lookup(
        &self,
        id: EnvId,
        caller: Option<usize>,
        check_perm: bool,
    ) -> Result<usize, SysError> {
        if id.is_current() {
            return caller.ok_or(SysError::BadEnv);
        }
        let index = id.index();
        let env = self.envs.get(index).ok_or(SysError::BadEnv)?;
        if env.is_free() || env.id != id {
            return Err(SysError::BadEnv);
        }
        if check_perm {
            let caller = caller.ok_or(SysError::BadEnv)?;
            let caller_id = self.envs[caller].id;
            if index != caller && env.parent != Some(caller_id) {
                return Err(SysError::BadEnv);
            }
        }
        Ok(index)
    }

    /// Slot index of a live environment id, without permission checks.
    pub fn index_of(&self, id: EnvId) -> Option<usize> {
        self.lookup(id, None, false).ok()
    }
}

impl Index<usize> for EnvTable {
    type Output = Env;

    fn index(&self, index: usize) -> &Env {
        &self.envs[index]
    }
}

impl IndexMut<usize> for EnvTable {
    fn index_mut(&mut self, index: usize) -> &mut Env {
        &mut self.envs[index]
    }
}
