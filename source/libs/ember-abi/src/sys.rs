// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-side view of the kernel: the syscall surface and the read-only
//! windows a user environment has onto its own page table and the
//! environment table.
//!
//! The user runtime is written against these traits so it can run on real
//! hardware stubs or on a hosted kernel in tests.

use crate::env::{EnvInfo, EnvStatus};
use crate::error::SysError;
use crate::flags::{FaultCause, PageFlags};
use crate::ids::{EnvId, UpcallEntry, VirtAddr};

/// Syscall numbers carried in the first argument register.
pub mod nr {
    /// `getenvid()`
    pub const GETENVID: u32 = 2;
    /// `env_destroy(env)`
    pub const ENV_DESTROY: u32 = 3;
    /// `page_alloc(env, va, perm)`
    pub const PAGE_ALLOC: u32 = 4;
    /// `page_map(src, src_va, dst, dst_va, perm)`
    pub const PAGE_MAP: u32 = 5;
    /// `page_unmap(env, va)`
    pub const PAGE_UNMAP: u32 = 6;
    /// `exofork()`
    pub const EXOFORK: u32 = 7;
    /// `env_set_status(env, status)`
    pub const ENV_SET_STATUS: u32 = 8;
    /// `env_set_pgfault_upcall(env, entry)`
    pub const ENV_SET_PGFAULT_UPCALL: u32 = 9;
    /// `yield()`
    pub const YIELD: u32 = 10;
    /// `ipc_try_send(to, value, src_va, perm)`
    pub const IPC_TRY_SEND: u32 = 11;
    /// `ipc_recv(dst_va)`
    pub const IPC_RECV: u32 = 12;
}

/// Syscalls available to user environments.
///
/// `EnvId::CURRENT` in any `env` argument names the caller.
pub trait Syscalls {
    /// Id of the calling environment.
    fn getenvid(&mut self) -> EnvId;

    /// Gives up the CPU; returns once the caller is scheduled again.
    fn yield_cpu(&mut self);

    /// Destroys `env` (the caller or one of its children).
    fn env_destroy(&mut self, env: EnvId) -> Result<(), SysError>;

    /// Creates a blank child with a copy of the caller's registers.
    ///
    /// Returns the child id in the parent and `EnvId::CURRENT` in the child.
    fn exofork(&mut self) -> Result<EnvId, SysError>;

    /// Sets `env` to `Runnable` or `NotRunnable`.
    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), SysError>;

    /// Registers the page-fault upcall of `env`.
    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry) -> Result<(), SysError>;

    /// Maps a fresh zeroed page at `va` in `env`.
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PageFlags) -> Result<(), SysError>;

    /// Maps the page at `src_va` of `src` into `dst` at `dst_va`.
    fn page_map(
        &mut self,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PageFlags,
    ) -> Result<(), SysError>;

    /// Removes the mapping at `va` in `env`; absent mappings are not an error.
    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), SysError>;

    /// Attempts to deliver `value` (and optionally the page at `page`) to `to`.
    fn ipc_try_send(
        &mut self,
        to: EnvId,
        value: u32,
        page: Option<VirtAddr>,
        perm: PageFlags,
    ) -> Result<(), SysError>;

    /// Blocks until a message arrives; a sent page lands at `dst` when given.
    fn ipc_recv(&mut self, dst: Option<VirtAddr>) -> Result<(), SysError>;
}

/// A user access the MMU refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting address.
    pub va: VirtAddr,
    /// Cause bits.
    pub cause: FaultCause,
}

/// Read-only windows and plain memory access of a running user environment.
pub trait UserSpace {
    /// True when a page table covers the region containing `va`.
    fn uvpd(&self, va: VirtAddr) -> bool;

    /// Flags of the entry mapping the page at `va`, if any.
    fn uvpt(&self, va: VirtAddr) -> Option<PageFlags>;

    /// Snapshot of the calling environment.
    fn this_env(&self) -> EnvInfo;

    /// Number of slots in the environment table.
    fn env_count(&self) -> usize;

    /// Snapshot of slot `index`.
    fn env_at(&self, index: usize) -> Option<EnvInfo>;

    /// Loads bytes through the caller's page table.
    fn read_bytes(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), PageFault>;

    /// Stores bytes through the caller's page table. Faults are reported, not resolved.
    fn write_bytes(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), PageFault>;
}

/// Everything the user runtime needs from its environment.
pub trait UserEnv: Syscalls + UserSpace {}

impl<T: Syscalls + UserSpace + ?Sized> UserEnv for T {}
