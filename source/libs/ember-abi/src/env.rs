// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment status, type, and the read-only snapshot user code sees.

use crate::flags::PageFlags;
use crate::ids::{EnvId, UpcallEntry};

/// Lifecycle state of an environment slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum EnvStatus {
    /// Slot is unused.
    #[default]
    Free,
    /// Destroyed while running on another CPU; freed at that CPU's next kernel entry.
    Dying,
    /// Eligible for scheduling.
    Runnable,
    /// Currently executing on exactly one CPU.
    Running,
    /// Blocked, e.g. waiting in `ipc_recv` or not yet started after `exofork`.
    NotRunnable,
}

impl EnvStatus {
    /// Wire encoding used in syscall arguments.
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Free => 0,
            Self::Dying => 1,
            Self::Runnable => 2,
            Self::Running => 3,
            Self::NotRunnable => 4,
        }
    }

    /// Decodes a wire status word.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Dying),
            2 => Some(Self::Runnable),
            3 => Some(Self::Running),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }
}

/// Role tag used to locate special environments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum EnvType {
    /// Ordinary user environment.
    #[default]
    User,
    /// File-system server.
    Fs,
    /// Network server.
    Net,
}

/// Snapshot of an environment record as exposed read-only to user space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EnvInfo {
    /// Identity of the environment.
    pub id: EnvId,
    /// Creator, if any.
    pub parent: Option<EnvId>,
    /// Role tag.
    pub env_type: EnvType,
    /// Lifecycle state.
    pub status: EnvStatus,
    /// Number of times the environment was dispatched.
    pub runs: u32,
    /// True while blocked in `ipc_recv`.
    pub ipc_recving: bool,
    /// Sender of the last delivered message.
    pub ipc_from: Option<EnvId>,
    /// Value of the last delivered message.
    pub ipc_value: u32,
    /// Permission of the page transferred with the last message; empty when none.
    pub ipc_perm: PageFlags,
    /// Registered page-fault upcall.
    pub pgfault_upcall: Option<UpcallEntry>,
}
