// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI between the Ember kernel core and the user-level runtime
//! OWNERS: @runtime
//! PUBLIC API: VirtAddr, EnvId, PageFlags, FaultCause, EnvStatus, EnvType, EnvInfo, TrapFrame,
//!             UTrapframe, SysError, Syscalls, UserSpace, UserEnv
//! DEPENDS_ON: bitflags, thiserror (no_std)
//! INVARIANTS: COW implies read-only; env ids carry a generation above the slot index;
//!             error codes are stable negative integers

pub mod env;
pub mod error;
pub mod flags;
pub mod ids;
pub mod layout;
pub mod sys;
pub mod trap;

pub use env::{EnvInfo, EnvStatus, EnvType};
pub use error::SysError;
pub use flags::{FaultCause, PageFlags};
pub use ids::{EnvId, UpcallEntry, VirtAddr};
pub use layout::PAGE_SIZE;
pub use sys::{PageFault, Syscalls, UserEnv, UserSpace};
pub use trap::{PushRegs, TrapFrame, UTrapframe};
