// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]

//! CONTEXT: Ember teaching-kernel core: environments, round-robin scheduling,
//!          user page-fault delivery, and the syscalls that user-level COW fork
//!          and IPC are built on
//! OWNERS: @kernel-team
//! STATUS: Functional (hosted; hardware bring-up lives behind the `Machine` trait)
//! PUBLIC API: Kernel, KernelConfig, Dispatch, Syscall, SyscallOutcome, FaultOutcome,
//!             Machine, monitor::{Console, Resume}, ProgramImage
//! DEPENDS_ON: ember-abi, spin (big kernel lock), log (diagnostics)
//! INVARIANTS: All kernel state sits behind one lock; at most one environment runs per CPU
//!             and no environment runs on two CPUs; a page is never both COW and writable

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod config;
pub mod cpu;
pub mod env;
pub mod kernel;
pub mod machine;
pub mod mm;
pub mod monitor;
pub mod sched;
pub mod syscall;
pub mod trap;
pub mod types;

pub use config::{ConfigError, KernelConfig};
pub use cpu::CpuStatus;
pub use env::image::{ProgramImage, Segment};
pub use kernel::{Dispatch, Kernel, KernelState};
pub use machine::Machine;
pub use syscall::{Syscall, SyscallOutcome};
pub use trap::FaultOutcome;
pub use types::CpuId;
