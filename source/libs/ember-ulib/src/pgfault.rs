// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write page-fault resolver and exception-stack setup
//! OWNERS: @runtime
//! PUBLIC API: PGFAULT_UPCALL, set_pgfault_handler, cow_fault, handle_fault, FaultError
//! DEPENDS_ON: ember_abi::UserEnv
//! INVARIANTS: Only write faults on present COW pages are resolved; the copy goes through
//!             the PFTEMP scratch slot and replaces the shared mapping with a private
//!             writable one; the resolver is not reentrant within one environment

use ember_abi::layout::{PFTEMP, UTEXT, UXSTACKTOP};
use ember_abi::{
    EnvId, FaultCause, PageFlags, SysError, UTrapframe, UpcallEntry, UserEnv, VirtAddr, PAGE_SIZE,
};
use thiserror::Error;

/// Entry of the assembly trampoline the user linker script places just above the
/// program entry; it calls [`handle_fault`] and restores the interrupted frame.
pub const PGFAULT_UPCALL: UpcallEntry = UpcallEntry::new(VirtAddr::new(UTEXT + 0x10));

const SCRATCH: VirtAddr = VirtAddr::new(PFTEMP);
const EXCEPTION_STACK: VirtAddr = VirtAddr::new(UXSTACKTOP - PAGE_SIZE);

/// Why a page fault could not be resolved. Always fatal for the faulting environment.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The faulting access was a read or an instruction fetch.
    #[error("fault at {va} is not a write ({cause:?})")]
    NotWrite {
        /// Faulting address.
        va: VirtAddr,
        /// Reported cause bits.
        cause: FaultCause,
    },
    /// The page is unmapped or mapped without the COW bit.
    #[error("fault at {va} is not on a copy-on-write page")]
    NotCow {
        /// Faulting address.
        va: VirtAddr,
    },
    /// A syscall of the resolution sequence failed.
    #[error("{step} failed while copying {va}: {source}")]
    Syscall {
        /// Faulting address.
        va: VirtAddr,
        /// Name of the failing syscall.
        step: &'static str,
        /// Kernel error.
        #[source]
        source: SysError,
    },
    /// Copying the page contents faulted.
    #[error("copying {va} faulted at {at}")]
    Copy {
        /// Faulting address.
        va: VirtAddr,
        /// Address whose access failed during the copy.
        at: VirtAddr,
    },
}

/// Installs the COW resolver for the calling environment.
///
/// The exception stack is allocated only on first install; registering the same
/// upcall again is skipped.
pub fn set_pgfault_handler<S: UserEnv + ?Sized>(sys: &mut S) -> Result<(), SysError> {
    let current = sys.this_env().pgfault_upcall;
    if current.is_none() {
        sys.page_alloc(EnvId::CURRENT, EXCEPTION_STACK, PageFlags::USER_RW)?;
    }
    if current != Some(PGFAULT_UPCALL) {
        sys.env_set_pgfault_upcall(EnvId::CURRENT, PGFAULT_UPCALL)?;
    }
    Ok(())
}

/// Resolves a write fault on a COW page by giving the caller a private copy.
pub fn cow_fault<S: UserEnv + ?Sized>(sys: &mut S, utf: &UTrapframe) -> Result<(), FaultError> {
    let va = utf.fault_va;
    if !utf.err.is_write() {
        return Err(FaultError::NotWrite { va, cause: utf.err });
    }
    let cow = sys.uvpd(va) && sys.uvpt(va).is_some_and(|flags| flags.is_present() && flags.is_cow());
    if !cow {
        return Err(FaultError::NotCow { va });
    }

    let page = va.page_down();
    let step = |step: &'static str| move |source: SysError| FaultError::Syscall { va, step, source };
    sys.page_alloc(EnvId::CURRENT, SCRATCH, PageFlags::USER_RW).map_err(step("page_alloc"))?;
    let mut buf = [0u8; PAGE_SIZE];
    sys.read_bytes(page, &mut buf).map_err(|fault| FaultError::Copy { va, at: fault.va })?;
    sys.write_bytes(SCRATCH, &buf).map_err(|fault| FaultError::Copy { va, at: fault.va })?;
    sys.page_map(EnvId::CURRENT, SCRATCH, EnvId::CURRENT, page, PageFlags::USER_RW)
        .map_err(step("page_map"))?;
    sys.page_unmap(EnvId::CURRENT, SCRATCH).map_err(step("page_unmap"))?;
    log::trace!(target: "pgfault", "private copy of {}", page);
    Ok(())
}

/// Upcall body: resolves the fault or aborts the environment.
pub fn handle_fault<S: UserEnv + ?Sized>(sys: &mut S, utf: &UTrapframe) {
    if let Err(err) = cow_fault(sys, utf) {
        log::error!(target: "pgfault", "unresolvable fault, eip {:08x}", utf.eip);
        crate::abort(sys, &err);
    }
}
