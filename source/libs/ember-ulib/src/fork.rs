// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write fork
//! OWNERS: @runtime
//! PUBLIC API: fork, try_fork, ForkResult, ForkError
//! DEPENDS_ON: pgfault (resolver install), ember_abi::UserEnv
//! INVARIANTS: Writable and COW pages end up COW in both parent and child; read-only
//!             pages are shared as-is; the child's exception stack is private; the child
//!             becomes runnable only after its address space is complete

use ember_abi::layout::{PT_SIZE, UTEXT, UXSTACKTOP};
use ember_abi::{EnvId, EnvStatus, PageFlags, SysError, TrapFrame, UserEnv, VirtAddr, PAGE_SIZE};
use thiserror::Error;

use crate::pgfault::{set_pgfault_handler, PGFAULT_UPCALL};

/// Which side of a fork the caller is on.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ForkResult {
    /// The original environment; `child` is now runnable.
    Parent {
        /// Id of the new environment.
        child: EnvId,
    },
    /// The new environment, started with a return value of 0.
    Child,
}

impl ForkResult {
    /// Decodes the fork result an environment observes from its saved registers.
    pub fn of_frame(frame: &TrapFrame) -> Result<Self, SysError> {
        Ok(match SysError::decode(frame.syscall_return())? {
            0 => Self::Child,
            raw => Self::Parent { child: EnvId::from_raw(raw) },
        })
    }

    /// True in the new environment.
    pub const fn is_child(&self) -> bool {
        matches!(self, Self::Child)
    }
}

/// A fork step that failed. The caller is expected to abort.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    /// Installing the COW resolver for the parent failed.
    #[error("installing the fault handler failed: {0}")]
    Handler(#[source] SysError),
    /// No child could be created.
    #[error("exofork failed: {0}")]
    Exofork(#[source] SysError),
    /// Sharing a page with the child failed; the child was discarded.
    #[error("sharing {va} with {child} failed: {source}")]
    Share {
        /// The discarded child.
        child: EnvId,
        /// Page being shared.
        va: VirtAddr,
        /// Kernel error.
        #[source]
        source: SysError,
    },
    /// Preparing the child to run failed.
    #[error("{step} for {child} failed: {source}")]
    Setup {
        /// The discarded child.
        child: EnvId,
        /// Name of the failing syscall.
        step: &'static str,
        /// Kernel error.
        #[source]
        source: SysError,
    },
}

/// Forks the caller, aborting it on any failure.
pub fn fork<S: UserEnv + ?Sized>(sys: &mut S) -> ForkResult {
    match try_fork(sys) {
        Ok(result) => result,
        Err(err) => crate::abort(sys, &err),
    }
}

/// Forks the caller with copy-on-write sharing of every writable page.
///
/// A child whose setup fails is destroyed before the error is returned.
pub fn try_fork<S: UserEnv + ?Sized>(sys: &mut S) -> Result<ForkResult, ForkError> {
    set_pgfault_handler(sys).map_err(ForkError::Handler)?;
    let child = sys.exofork().map_err(ForkError::Exofork)?;
    if child.is_current() {
        return Ok(ForkResult::Child);
    }
    if let Err(err) = build_child(sys, child) {
        if let Err(destroy) = sys.env_destroy(child) {
            log::warn!(target: "fork", "discarding {} failed: {}", child, destroy);
        }
        return Err(err);
    }
    log::debug!(target: "fork", "[{}] forked {}", sys.getenvid(), child);
    Ok(ForkResult::Parent { child })
}

fn build_child<S: UserEnv + ?Sized>(sys: &mut S, child: EnvId) -> Result<(), ForkError> {
    let mut va = VirtAddr::new(UTEXT);
    let end = VirtAddr::new(UXSTACKTOP - PAGE_SIZE);
    while va < end {
        if !sys.uvpd(va) {
            va = va.table_down().offset(PT_SIZE);
            continue;
        }
        if let Some(flags) = sys.uvpt(va).filter(|flags| flags.is_present() && flags.is_user()) {
            duppage(sys, child, va, flags)?;
        }
        va = va.offset(PAGE_SIZE);
    }

    let setup = |step: &'static str| move |source: SysError| ForkError::Setup { child, step, source };
    sys.page_alloc(child, end, PageFlags::USER_RW).map_err(setup("page_alloc"))?;
    sys.env_set_pgfault_upcall(child, PGFAULT_UPCALL).map_err(setup("env_set_pgfault_upcall"))?;
    sys.env_set_status(child, EnvStatus::Runnable).map_err(setup("env_set_status"))?;
    Ok(())
}

/// Shares the page at `va` with `child`.
///
/// Writable or COW pages become COW on both sides, child first. The caller's entry is
/// re-marked even when already COW.
fn duppage<S: UserEnv + ?Sized>(
    sys: &mut S,
    child: EnvId,
    va: VirtAddr,
    flags: PageFlags,
) -> Result<(), ForkError> {
    let share = |source: SysError| ForkError::Share { child, va, source };
    if flags.is_writable() || flags.is_cow() {
        sys.page_map(EnvId::CURRENT, va, child, va, PageFlags::USER_COW).map_err(share)?;
        sys.page_map(EnvId::CURRENT, va, EnvId::CURRENT, va, PageFlags::USER_COW).map_err(share)?;
    } else {
        sys.page_map(EnvId::CURRENT, va, child, va, PageFlags::USER_RO).map_err(share)?;
    }
    Ok(())
}
