// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state behind the big kernel lock, environment lifecycle, dispatch
//! OWNERS: @kernel-team
//! STATUS: Functional
//! PUBLIC API: Kernel (new/lock/env_create/env_destroy/schedule/sched_yield/interrupt/
//!             user_read/user_write/uvpt/env_info), KernelState, Dispatch
//! DEPENDS_ON: env::EnvTable, mm::FrameAllocator, sched::decide, cpu::Cpu, spin::Mutex
//! INVARIANTS: Every public entry point takes the kernel lock for its whole duration and
//!             releases it before control leaves the kernel; an environment is Running iff it
//!             is the current environment of exactly one CPU

#[cfg(test)]
mod tests_prop;

use alloc::vec::Vec;
use core::cmp::min;

use ember_abi::layout::{USTACKTOP, UTOP};
use ember_abi::{
    EnvId, EnvInfo, EnvStatus, EnvType, FaultCause, PageFault, PageFlags, SysError, TrapFrame,
    VirtAddr, PAGE_SIZE,
};
use spin::{Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use crate::config::{ConfigError, KernelConfig};
use crate::cpu::{Cpu, CpuStatus};
use crate::env::image::ProgramImage;
use crate::env::EnvTable;
use crate::machine::Machine;
use crate::mm::{FrameAllocator, FrameId, Pte};
use crate::sched::{self, Decision};
use crate::types::CpuId;

/// What the CPU does when it leaves the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Restore `frame` and run `env` in user mode.
    Run { cpu: CpuId, env: EnvId, frame: TrapFrame },
    /// Reset onto the CPU's kernel stack and wait for an interrupt.
    Halt { cpu: CpuId, kstack_top: usize },
    /// Enter the kernel monitor.
    Monitor { cpu: CpuId },
}

/// All mutable kernel state; only reachable through [`Kernel::lock`].
pub struct KernelState {
    config: KernelConfig,
    pub(crate) frames: FrameAllocator,
    pub(crate) envs: EnvTable,
    pub(crate) cpus: Vec<Cpu>,
}

/// The kernel: one big lock around [`KernelState`].
pub struct Kernel {
    state: Mutex<KernelState>,
}

assert_impl_all!(Kernel: Send, Sync);

impl Kernel {
    /// Builds the kernel tables. Only the boot CPU starts out running.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut cpus: Vec<Cpu> =
            (0..config.ncpu).map(|i| Cpu::new(CpuId::from_raw(i as u16))).collect();
        if let Some(boot) = cpus.first_mut() {
            boot.status = CpuStatus::Started;
        }
        log_info!(
            target: "kernel",
            "ember: {} env slots, {} cpus, {} frames",
            config.nenv,
            config.ncpu,
            config.nframes
        );
        Ok(Self {
            state: Mutex::new(KernelState {
                config,
                frames: FrameAllocator::new(config.nframes),
                envs: EnvTable::new(config.nenv),
                cpus,
            }),
        })
    }

    /// Acquires the big kernel lock.
    pub fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock()
    }

    /// Marks an application processor as started.
    pub fn start_cpu(&self, cpu: CpuId) {
        self.lock().cpu_mut(cpu).status = CpuStatus::Started;
    }

    /// Creates a runnable environment from `image`.
    pub fn env_create(&self, image: &ProgramImage, env_type: EnvType) -> Result<EnvId, SysError> {
        self.lock().env_create(image, env_type)
    }

    /// Destroys `env` on behalf of the kernel (no permission check).
    ///
    /// Returns a new dispatch for `cpu` when it was running the victim.
    pub fn env_destroy(&self, cpu: CpuId, env: EnvId) -> Result<Option<Dispatch>, SysError> {
        let mut state = self.lock();
        let index = state.envs.lookup(env, None, false)?;
        Ok(state.env_destroy(cpu, index))
    }

    /// Chooses what `cpu` runs next.
    pub fn schedule(&self, cpu: CpuId) -> Dispatch {
        self.lock().schedule(cpu)
    }

    /// Schedules `cpu` and hands control to the machine; the lock is released first.
    pub fn sched_yield<M: Machine + ?Sized>(&self, cpu: CpuId, machine: &mut M) -> ! {
        let dispatch = self.schedule(cpu);
        machine.dispatch(self, dispatch)
    }

    /// Timer interrupt on `cpu`: wakes a halted CPU and preempts its environment.
    pub fn interrupt(&self, cpu: CpuId) -> Dispatch {
        let mut state = self.lock();
        state.cpu_mut(cpu).status = CpuStatus::Started;
        if let Some(dispatch) = state.reap_current(cpu) {
            return dispatch;
        }
        state.schedule(cpu)
    }

    pub fn current(&self, cpu: CpuId) -> Option<EnvId> {
        self.lock().cpu(cpu).current
    }

    pub fn cpu_status(&self, cpu: CpuId) -> CpuStatus {
        self.lock().cpu(cpu).status
    }

    /// Snapshot of a live environment.
    pub fn env_info(&self, env: EnvId) -> Option<EnvInfo> {
        let state = self.lock();
        state.envs.index_of(env).map(|index| state.envs[index].info())
    }

    /// Number of environment slots.
    pub fn env_count(&self) -> usize {
        self.lock().envs.len()
    }

    /// Snapshot of slot `index`, free or not.
    pub fn env_at(&self, index: usize) -> Option<EnvInfo> {
        self.lock().envs.get(index).map(|env| env.info())
    }

    /// Saved registers of a live environment.
    pub fn saved_frame(&self, env: EnvId) -> Option<TrapFrame> {
        let state = self.lock();
        state.envs.index_of(env).map(|index| state.envs[index].frame)
    }

    /// Entry mapping `va` in a live environment.
    pub fn mapping(&self, env: EnvId, va: VirtAddr) -> Option<Pte> {
        let state = self.lock();
        let index = state.envs.index_of(env)?;
        state.envs[index].space.as_ref()?.lookup(va)
    }

    /// Entries of `env` whose pages start in `[start, end)`.
    pub fn mappings(
        &self,
        env: EnvId,
        start: VirtAddr,
        end: VirtAddr,
    ) -> Result<Vec<(VirtAddr, Pte)>, SysError> {
        let state = self.lock();
        let index = state.envs.lookup(env, None, false)?;
        let space = state.envs[index].space.as_ref().ok_or(SysError::BadEnv)?;
        Ok(space.mappings(start, end))
    }

    /// Rewrites the permission bits of an existing entry of `env`.
    pub fn set_mapping_perm(
        &self,
        env: EnvId,
        va: VirtAddr,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        let mut state = self.lock();
        let index = state.envs.lookup(env, None, false)?;
        let space = state.envs[index].space.as_mut().ok_or(SysError::BadEnv)?;
        space.set_flags(va.page_down(), perm).map_err(SysError::from)
    }

    pub fn frame_refs(&self, frame: FrameId) -> u32 {
        self.lock().frames.refs(frame)
    }

    pub fn free_frames(&self) -> usize {
        self.lock().frames.free_count()
    }

    /// `uvpt` window of the environment current on `cpu`.
    pub fn uvpt(&self, cpu: CpuId, va: VirtAddr) -> Option<PageFlags> {
        let state = self.lock();
        let index = state.current_index(cpu)?;
        state.envs[index].space.as_ref()?.lookup(va).map(|pte| pte.flags)
    }

    /// `uvpd` window of the environment current on `cpu`.
    pub fn uvpd(&self, cpu: CpuId, va: VirtAddr) -> bool {
        let state = self.lock();
        state
            .current_index(cpu)
            .and_then(|index| state.envs[index].space.as_ref())
            .is_some_and(|space| space.has_table(va))
    }

    /// User load by the environment current on `cpu`.
    pub fn user_read(&self, cpu: CpuId, va: VirtAddr, buf: &mut [u8]) -> Result<(), PageFault> {
        let state = self.lock();
        let index = state
            .current_index(cpu)
            .ok_or(PageFault { va, cause: FaultCause::USER })?;
        state.read_user(index, va, buf)
    }

    /// User store by the environment current on `cpu`.
    pub fn user_write(&self, cpu: CpuId, va: VirtAddr, data: &[u8]) -> Result<(), PageFault> {
        let mut state = self.lock();
        let index = state
            .current_index(cpu)
            .ok_or(PageFault { va, cause: FaultCause::USER | FaultCause::WRITE })?;
        state.write_user(index, va, data)
    }

    /// Forces the next frame allocation to fail.
    #[cfg(feature = "failpoints")]
    pub fn deny_next_frame_alloc(&self) {
        self.lock().frames.deny_next_alloc();
    }
}

impl KernelState {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub(crate) fn cpu(&self, cpu: CpuId) -> &Cpu {
        &self.cpus[cpu.as_index()]
    }

    pub(crate) fn cpu_mut(&mut self, cpu: CpuId) -> &mut Cpu {
        &mut self.cpus[cpu.as_index()]
    }

    /// Slot of the environment dispatched on `cpu`, if it is still alive.
    pub(crate) fn current_index(&self, cpu: CpuId) -> Option<usize> {
        self.cpu(cpu).current.and_then(|id| self.envs.index_of(id))
    }

    pub(crate) fn env_create(
        &mut self,
        image: &ProgramImage,
        env_type: EnvType,
    ) -> Result<EnvId, SysError> {
        let index = self.envs.alloc(&mut self.frames, None)?;
        self.envs[index].env_type = env_type;
        if let Err(err) = self.load_image(index, image) {
            self.envs.free(&mut self.frames, index);
            return Err(err);
        }
        let id = self.envs[index].id;
        log_info!(target: "env", "[{}] created ({:?}, entry {})", id, env_type, image.entry);
        Ok(id)
    }

    fn load_image(&mut self, index: usize, image: &ProgramImage) -> Result<(), SysError> {
        for segment in &image.segments {
            let end = segment.end().ok_or(SysError::Inval)?;
            if end.raw() > UTOP {
                return Err(SysError::Inval);
            }
            let flags = if segment.writable { PageFlags::USER_RW } else { PageFlags::USER_RO };
            let mut page = segment.va.page_down();
            while page < end {
                let existing = self.envs[index].space.as_ref().and_then(|space| space.lookup(page));
                match existing {
                    Some(pte) => self.map_frame(index, page, pte.frame, pte.flags | flags)?,
                    None => self.map_fresh(index, page, flags)?,
                }
                page = page.offset(PAGE_SIZE);
            }
            self.poke(index, segment.va, &segment.data)?;
        }
        self.map_fresh(index, VirtAddr::new(USTACKTOP - PAGE_SIZE), PageFlags::USER_RW)?;
        self.envs[index].frame = TrapFrame::user(image.entry.raw() as u32, USTACKTOP as u32);
        Ok(())
    }

    /// Maps a fresh zeroed frame at `va` in slot `index`.
    pub(crate) fn map_fresh(
        &mut self,
        index: usize,
        va: VirtAddr,
        flags: PageFlags,
    ) -> Result<(), SysError> {
        let frame = self.frames.alloc()?;
        if let Err(err) = self.map_frame(index, va, frame, flags) {
            self.frames.release_unused(frame);
            return Err(err);
        }
        Ok(())
    }

    /// Maps `frame` at `va` in slot `index`, releasing whatever was there.
    pub(crate) fn map_frame(
        &mut self,
        index: usize,
        va: VirtAddr,
        frame: FrameId,
        flags: PageFlags,
    ) -> Result<(), SysError> {
        let Self { envs, frames, .. } = self;
        let space = envs[index].space.as_mut().ok_or(SysError::BadEnv)?;
        space.insert(frames, va, frame, flags).map_err(SysError::from)
    }

    /// Kernel store into slot `index` ignoring user permissions.
    pub(crate) fn poke(&mut self, index: usize, va: VirtAddr, data: &[u8]) -> Result<(), SysError> {
        let Self { envs, frames, .. } = self;
        let space = envs[index].space.as_ref().ok_or(SysError::BadEnv)?;
        let mut done = 0;
        while done < data.len() {
            let at = va.checked_add(done).ok_or(SysError::Fault)?;
            let pte = space.lookup(at).ok_or(SysError::Fault)?;
            let offset = at.page_offset();
            let n = min(PAGE_SIZE - offset, data.len() - done);
            frames.data_mut(pte.frame)[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// User load through slot `index`'s page table.
    pub(crate) fn read_user(
        &self,
        index: usize,
        va: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), PageFault> {
        let space = self.envs[index]
            .space
            .as_ref()
            .ok_or(PageFault { va, cause: FaultCause::USER })?;
        let mut done = 0;
        while done < buf.len() {
            let at = va
                .checked_add(done)
                .ok_or(PageFault { va, cause: FaultCause::USER | FaultCause::PROTECTION })?;
            let pte = space.check_access(at, false).map_err(|cause| PageFault { va: at, cause })?;
            let offset = at.page_offset();
            let n = min(PAGE_SIZE - offset, buf.len() - done);
            buf[done..done + n].copy_from_slice(&self.frames.data(pte.frame)[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// User store through slot `index`'s page table. Stops at the first faulting page;
    /// bytes before it are already written.
    pub(crate) fn write_user(
        &mut self,
        index: usize,
        va: VirtAddr,
        data: &[u8],
    ) -> Result<(), PageFault> {
        let Self { envs, frames, .. } = self;
        let space = envs[index]
            .space
            .as_ref()
            .ok_or(PageFault { va, cause: FaultCause::USER | FaultCause::WRITE })?;
        let mut done = 0;
        while done < data.len() {
            let at = va.checked_add(done).ok_or(PageFault {
                va,
                cause: FaultCause::USER | FaultCause::WRITE | FaultCause::PROTECTION,
            })?;
            let pte = space.check_access(at, true).map_err(|cause| PageFault { va: at, cause })?;
            let offset = at.page_offset();
            let n = min(PAGE_SIZE - offset, data.len() - done);
            frames.data_mut(pte.frame)[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Makes slot `index` the current environment of `cpu` and dispatches it.
    pub(crate) fn env_run(&mut self, cpu: CpuId, index: usize) -> Dispatch {
        if let Some(prev) = self.current_index(cpu) {
            let prev = &mut self.envs[prev];
            if prev.status == EnvStatus::Running {
                prev.status = EnvStatus::Runnable;
            }
        }
        let env = &mut self.envs[index];
        env.status = EnvStatus::Running;
        env.runs = env.runs.wrapping_add(1);
        env.cpu = Some(cpu);
        let (id, frame) = (env.id, env.frame);
        let slot = self.cpu_mut(cpu);
        slot.current = Some(id);
        slot.status = CpuStatus::Started;
        log_trace!(target: "sched", "cpu{} -> env {}", cpu, id);
        Dispatch::Run { cpu, env: id, frame }
    }

    /// Round-robin pick for `cpu`; halts the CPU when nothing is runnable.
    ///
    /// A pending park of the outgoing environment takes effect here.
    pub fn schedule(&mut self, cpu: CpuId) -> Dispatch {
        let last = self.current_index(cpu);
        if let Some(index) = last {
            self.park_if_pending(cpu, index);
        }
        match sched::decide(&self.envs, last, cfg!(feature = "monitor_on_idle")) {
            Decision::Run(index) => self.env_run(cpu, index),
            Decision::Monitor => {
                log_warn!(target: "sched", "no runnable environments in the system");
                Dispatch::Monitor { cpu }
            }
            Decision::Halt => {
                let slot = self.cpu_mut(cpu);
                slot.current = None;
                slot.status = CpuStatus::Halted;
                log_debug!(target: "sched", "cpu{} halted", cpu);
                Dispatch::Halt { cpu, kstack_top: slot.kstack_top() }
            }
        }
    }

    fn park_if_pending(&mut self, cpu: CpuId, index: usize) {
        let env = &mut self.envs[index];
        if core::mem::take(&mut env.park_pending) && env.status == EnvStatus::Running {
            env.status = EnvStatus::NotRunnable;
            log_debug!(target: "sched", "[{}] parked on cpu{}", env.id, cpu);
        }
    }

    /// Resumes the environment current on `cpu` without a scheduling decision.
    pub(crate) fn resume_current(&mut self, cpu: CpuId) -> Dispatch {
        match self.current_index(cpu) {
            Some(index)
                if self.envs[index].status == EnvStatus::Running && !self.envs[index].park_pending =>
            {
                let env = &self.envs[index];
                Dispatch::Run { cpu, env: env.id, frame: env.frame }
            }
            _ => self.schedule(cpu),
        }
    }

    /// Destroys slot `index`.
    ///
    /// An environment running on another CPU only becomes `Dying`; that CPU frees it
    /// on its next kernel entry. Destroying `cpu`'s own environment reschedules `cpu`.
    pub(crate) fn env_destroy(&mut self, cpu: CpuId, index: usize) -> Option<Dispatch> {
        let id = self.envs[index].id;
        let is_current = self.cpu(cpu).current == Some(id);
        if self.envs[index].status == EnvStatus::Running && !is_current {
            self.envs[index].status = EnvStatus::Dying;
            log_debug!(target: "env", "[{}] marked dying", id);
            return None;
        }
        self.envs.free(&mut self.frames, index);
        if is_current {
            self.cpu_mut(cpu).current = None;
            return Some(self.schedule(cpu));
        }
        None
    }

    /// Frees `cpu`'s current environment if another CPU destroyed it meanwhile.
    pub(crate) fn reap_current(&mut self, cpu: CpuId) -> Option<Dispatch> {
        let index = self.current_index(cpu)?;
        if self.envs[index].status != EnvStatus::Dying {
            return None;
        }
        log_debug!(target: "env", "[{}] reaped on cpu{}", self.envs[index].id, cpu);
        self.envs.free(&mut self.frames, index);
        self.cpu_mut(cpu).current = None;
        Some(self.schedule(cpu))
    }

    /// Kernel entry from user mode: reaps a dying environment or saves its registers.
    pub(crate) fn trap_enter(&mut self, cpu: CpuId, tf: &TrapFrame) -> Option<Dispatch> {
        self.cpu_mut(cpu).status = CpuStatus::Started;
        if let Some(dispatch) = self.reap_current(cpu) {
            return Some(dispatch);
        }
        if let Some(index) = self.current_index(cpu) {
            self.envs[index].frame = *tf;
        }
        None
    }
}
