// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall decoding and the kernel side of every user-visible syscall
//! OWNERS: @kernel-team
//! PUBLIC API: Syscall (decode), SyscallOutcome, Kernel::syscall, Kernel::syscall_trap
//! DEPENDS_ON: kernel::KernelState, env::EnvTable::lookup, mm::AddressSpace
//! INVARIANTS: Arguments are validated before any state changes; a failed call leaves
//!             the table untouched; COW pages are never granted write permission

use ember_abi::sys::nr;
use ember_abi::{
    EnvId, EnvStatus, PageFlags, PushRegs, SysError, TrapFrame, UpcallEntry, VirtAddr,
};

use crate::env::IpcState;
use crate::kernel::{Dispatch, Kernel, KernelState};
use crate::types::CpuId;

/// A decoded syscall request. `EnvId::CURRENT` names the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    GetEnvId,
    Yield,
    EnvDestroy { env: EnvId },
    Exofork,
    EnvSetStatus { env: EnvId, status: EnvStatus },
    EnvSetPgfaultUpcall { env: EnvId, entry: UpcallEntry },
    PageAlloc { env: EnvId, va: VirtAddr, perm: PageFlags },
    PageMap { src: EnvId, src_va: VirtAddr, dst: EnvId, dst_va: VirtAddr, perm: PageFlags },
    PageUnmap { env: EnvId, va: VirtAddr },
    IpcTrySend { to: EnvId, value: u32, page: Option<VirtAddr>, perm: PageFlags },
    IpcRecv { dst: Option<VirtAddr> },
}

impl Syscall {
    /// Decodes the register convention: number in `eax`, arguments in
    /// `edx, ecx, ebx, edi, esi`. Page addresses at or above `UTOP` mean "no page".
    pub fn decode(regs: &PushRegs) -> Result<Self, SysError> {
        let [a1, a2, a3, a4, a5] = [regs.edx, regs.ecx, regs.ebx, regs.edi, regs.esi];
        let env = EnvId::from_raw;
        let va = |word: u32| VirtAddr::new(word as usize);
        let page = |word: u32| Some(va(word)).filter(|va| va.is_user());
        let perm = PageFlags::from_bits_retain;
        Ok(match regs.eax {
            nr::GETENVID => Self::GetEnvId,
            nr::YIELD => Self::Yield,
            nr::ENV_DESTROY => Self::EnvDestroy { env: env(a1) },
            nr::EXOFORK => Self::Exofork,
            nr::ENV_SET_STATUS => Self::EnvSetStatus {
                env: env(a1),
                status: EnvStatus::from_raw(a2).ok_or(SysError::Inval)?,
            },
            nr::ENV_SET_PGFAULT_UPCALL => {
                Self::EnvSetPgfaultUpcall { env: env(a1), entry: UpcallEntry::new(va(a2)) }
            }
            nr::PAGE_ALLOC => Self::PageAlloc { env: env(a1), va: va(a2), perm: perm(a3) },
            nr::PAGE_MAP => Self::PageMap {
                src: env(a1),
                src_va: va(a2),
                dst: env(a3),
                dst_va: va(a4),
                perm: perm(a5),
            },
            nr::PAGE_UNMAP => Self::PageUnmap { env: env(a1), va: va(a2) },
            nr::IPC_TRY_SEND => {
                Self::IpcTrySend { to: env(a1), value: a2, page: page(a3), perm: perm(a4) }
            }
            nr::IPC_RECV => Self::IpcRecv { dst: page(a1) },
            _ => return Err(SysError::Inval),
        })
    }
}

/// Result of a syscall as seen by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// The caller keeps the CPU and observes this return value.
    Return(Result<u32, SysError>),
    /// The caller gave up (or lost) the CPU; `cpu` continues with this dispatch.
    Reschedule(Dispatch),
}

impl Kernel {
    /// Executes `call` on behalf of the environment current on `cpu`.
    pub fn syscall(&self, cpu: CpuId, call: Syscall) -> SyscallOutcome {
        self.lock().syscall(cpu, call)
    }

    /// Full syscall trap path: save registers, decode, execute, write the return register.
    pub fn syscall_trap(&self, cpu: CpuId, tf: &TrapFrame) -> Dispatch {
        let mut state = self.lock();
        if let Some(dispatch) = state.trap_enter(cpu, tf) {
            return dispatch;
        }
        let result = match Syscall::decode(&tf.regs) {
            Ok(call) => match state.syscall(cpu, call) {
                SyscallOutcome::Return(result) => result,
                SyscallOutcome::Reschedule(dispatch) => return dispatch,
            },
            Err(err) => Err(err),
        };
        if let Some(index) = state.current_index(cpu) {
            state.envs[index].frame.set_syscall_return(SysError::encode(result));
        }
        state.resume_current(cpu)
    }
}

fn user_page(va: VirtAddr) -> Result<(), SysError> {
    if va.is_user() && va.is_page_aligned() {
        Ok(())
    } else {
        Err(SysError::Inval)
    }
}

fn syscall_perm(perm: PageFlags) -> Result<(), SysError> {
    if perm.is_valid_syscall_perm() && perm.is_cow_consistent() {
        Ok(())
    } else {
        Err(SysError::Inval)
    }
}

impl KernelState {
    pub(crate) fn syscall(&mut self, cpu: CpuId, call: Syscall) -> SyscallOutcome {
        if let Some(dispatch) = self.reap_current(cpu) {
            return SyscallOutcome::Reschedule(dispatch);
        }
        let Some(caller) = self.current_index(cpu) else {
            log_warn!(target: "syscall", "cpu{}: {:?} without a current env", cpu, call);
            return SyscallOutcome::Return(Err(SysError::BadEnv));
        };
        let result = match call {
            Syscall::GetEnvId => Ok(self.envs[caller].id.as_raw()),
            Syscall::Yield => return SyscallOutcome::Reschedule(self.schedule(cpu)),
            Syscall::EnvDestroy { env } => match self.sys_env_destroy(cpu, caller, env) {
                SyscallOutcome::Return(result) => result,
                outcome => return outcome,
            },
            Syscall::Exofork => self.sys_exofork(caller),
            Syscall::EnvSetStatus { env, status } => self.sys_env_set_status(caller, env, status),
            Syscall::EnvSetPgfaultUpcall { env, entry } => {
                self.sys_env_set_pgfault_upcall(caller, env, entry)
            }
            Syscall::PageAlloc { env, va, perm } => self.sys_page_alloc(caller, env, va, perm),
            Syscall::PageMap { src, src_va, dst, dst_va, perm } => {
                self.sys_page_map(caller, src, src_va, dst, dst_va, perm)
            }
            Syscall::PageUnmap { env, va } => self.sys_page_unmap(caller, env, va),
            Syscall::IpcTrySend { to, value, page, perm } => {
                self.sys_ipc_try_send(caller, to, value, page, perm)
            }
            Syscall::IpcRecv { dst } => return self.sys_ipc_recv(cpu, caller, dst),
        };
        if let Err(err) = result {
            log_debug!(target: "syscall", "[{}] {:?} -> {}", self.envs[caller].id, call, err);
        }
        if self.envs[caller].park_pending {
            self.envs[caller].frame.set_syscall_return(SysError::encode(result));
            return SyscallOutcome::Reschedule(self.schedule(cpu));
        }
        SyscallOutcome::Return(result)
    }

    fn sys_env_destroy(&mut self, cpu: CpuId, caller: usize, env: EnvId) -> SyscallOutcome {
        let target = match self.envs.lookup(env, Some(caller), true) {
            Ok(target) => target,
            Err(err) => return SyscallOutcome::Return(Err(err)),
        };
        let caller_id = self.envs[caller].id;
        if target == caller {
            log_info!(target: "env", "[{}] exiting gracefully", caller_id);
        } else {
            log_info!(target: "env", "[{}] destroying {}", caller_id, self.envs[target].id);
        }
        match self.env_destroy(cpu, target) {
            Some(dispatch) => SyscallOutcome::Reschedule(dispatch),
            None => SyscallOutcome::Return(Ok(0)),
        }
    }

    /// Blank child: empty address space, caller's registers, 0 in its return register.
    fn sys_exofork(&mut self, caller: usize) -> Result<u32, SysError> {
        let parent = self.envs[caller].id;
        let frame = self.envs[caller].frame;
        let child = self.envs.alloc(&mut self.frames, Some(parent))?;
        let env = &mut self.envs[child];
        env.status = EnvStatus::NotRunnable;
        env.frame = frame;
        env.frame.set_syscall_return(0);
        Ok(env.id.as_raw())
    }

    fn sys_env_set_status(
        &mut self,
        caller: usize,
        env: EnvId,
        status: EnvStatus,
    ) -> Result<u32, SysError> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(SysError::Inval);
        }
        let target = self.envs.lookup(env, Some(caller), true)?;
        let env = &mut self.envs[target];
        match (env.status, status) {
            (EnvStatus::Dying, _) => return Err(SysError::BadEnv),
            // Still owned by its CPU, which applies the change on its next kernel entry.
            (EnvStatus::Running, EnvStatus::NotRunnable) => env.park_pending = true,
            (EnvStatus::Running, EnvStatus::Runnable) => env.park_pending = false,
            _ => env.status = status,
        }
        Ok(0)
    }

    fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: usize,
        env: EnvId,
        entry: UpcallEntry,
    ) -> Result<u32, SysError> {
        let target = self.envs.lookup(env, Some(caller), true)?;
        self.envs[target].pgfault_upcall = Some(entry);
        Ok(0)
    }

    fn sys_page_alloc(
        &mut self,
        caller: usize,
        env: EnvId,
        va: VirtAddr,
        perm: PageFlags,
    ) -> Result<u32, SysError> {
        let target = self.envs.lookup(env, Some(caller), true)?;
        user_page(va)?;
        syscall_perm(perm)?;
        self.map_fresh(target, va, perm)?;
        Ok(0)
    }

    fn sys_page_map(
        &mut self,
        caller: usize,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PageFlags,
    ) -> Result<u32, SysError> {
        let src = self.envs.lookup(src, Some(caller), true)?;
        let dst = self.envs.lookup(dst, Some(caller), true)?;
        user_page(src_va)?;
        user_page(dst_va)?;
        let pte = self.envs[src]
            .space
            .as_ref()
            .and_then(|space| space.lookup(src_va))
            .ok_or(SysError::Inval)?;
        syscall_perm(perm)?;
        if perm.is_writable() && !pte.flags.is_writable() {
            return Err(SysError::Inval);
        }
        self.map_frame(dst, dst_va, pte.frame, perm)?;
        Ok(0)
    }

    fn sys_page_unmap(&mut self, caller: usize, env: EnvId, va: VirtAddr) -> Result<u32, SysError> {
        let target = self.envs.lookup(env, Some(caller), true)?;
        user_page(va)?;
        let Self { envs, frames, .. } = self;
        if let Some(space) = envs[target].space.as_mut() {
            space.remove(frames, va);
        }
        Ok(0)
    }

    /// Non-blocking send. The page (when given) is validated even if the receiver
    /// does not want one; it is only transferred when the receiver named a slot.
    fn sys_ipc_try_send(
        &mut self,
        caller: usize,
        to: EnvId,
        value: u32,
        page: Option<VirtAddr>,
        perm: PageFlags,
    ) -> Result<u32, SysError> {
        let target = self.envs.lookup(to, Some(caller), false)?;
        if !self.envs[target].ipc.recving {
            return Err(SysError::IpcNotRecv);
        }
        let mut sent = PageFlags::empty();
        if let Some(src_va) = page {
            user_page(src_va)?;
            syscall_perm(perm)?;
            let pte = self.envs[caller]
                .space
                .as_ref()
                .and_then(|space| space.lookup(src_va))
                .ok_or(SysError::Inval)?;
            if perm.is_writable() && !pte.flags.is_writable() {
                return Err(SysError::Inval);
            }
            if let Some(dst_va) = self.envs[target].ipc.dst {
                self.map_frame(target, dst_va, pte.frame, perm)?;
                sent = perm;
            }
        }
        let from = self.envs[caller].id;
        let receiver = &mut self.envs[target];
        receiver.ipc = IpcState { recving: false, dst: None, value, from: Some(from), perm: sent };
        receiver.status = EnvStatus::Runnable;
        receiver.frame.set_syscall_return(0);
        log_trace!(target: "ipc", "[{}] -> {}: {:#x}", from, receiver.id, value);
        Ok(0)
    }

    /// Blocks the caller until a sender delivers; always reschedules.
    fn sys_ipc_recv(&mut self, cpu: CpuId, caller: usize, dst: Option<VirtAddr>) -> SyscallOutcome {
        if let Some(va) = dst {
            if let Err(err) = user_page(va) {
                return SyscallOutcome::Return(Err(err));
            }
        }
        let env = &mut self.envs[caller];
        env.ipc.recving = true;
        env.ipc.dst = dst;
        env.status = EnvStatus::NotRunnable;
        env.frame.set_syscall_return(0);
        SyscallOutcome::Reschedule(self.schedule(cpu))
    }
}
