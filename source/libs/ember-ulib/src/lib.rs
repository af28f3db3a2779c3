// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

//! CONTEXT: User-level runtime running in an environment's own context
//! OWNERS: @runtime
//! STATUS: Functional
//! PUBLIC API: fork/try_fork (COW duplication), pgfault (COW resolver, handler install),
//!             ipc (send/recv/find_env), abort
//! DEPENDS_ON: ember_abi::{Syscalls, UserSpace}
//! INVARIANTS: Every failure the runtime cannot recover from ends in `abort`; no
//!             partially-built child is ever made runnable

use core::fmt;

use ember_abi::{EnvId, Syscalls};

pub mod fork;
pub mod ipc;
pub mod pgfault;

pub use fork::{fork, try_fork, ForkError, ForkResult};
pub use ipc::{find_env, recv, send, try_send, IpcError, Received};
pub use pgfault::{cow_fault, handle_fault, set_pgfault_handler, FaultError, PGFAULT_UPCALL};

/// Logs `err` and destroys the calling environment.
///
/// Destroying oneself does not return; the yield loop only covers a kernel that
/// refused the request.
pub fn abort<S: Syscalls + ?Sized>(sys: &mut S, err: &dyn fmt::Display) -> ! {
    let me = sys.getenvid();
    log::error!(target: "ulib", "[{}] fatal: {}", me, err);
    if let Err(destroy) = sys.env_destroy(EnvId::CURRENT) {
        log::error!(target: "ulib", "[{}] self-destroy refused: {}", me, destroy);
    }
    loop {
        sys.yield_cpu();
    }
}
