// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Newtypes for addresses and environment identities.
//!
//! Kept distinct so call-sites cannot mix a user address with an id or a raw
//! syscall word.

use core::fmt;

use crate::layout::{ENVGENSHIFT, NENV, PAGE_SIZE, PT_SIZE, UTOP};

/// User virtual address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Wraps a raw address.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw address.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Rounds down to the containing page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    /// Rounds down to the start of the containing page-table region.
    #[inline]
    pub const fn table_down(self) -> Self {
        Self(self.0 & !(PT_SIZE - 1))
    }

    /// Page number of this address.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 / PAGE_SIZE
    }

    /// Page-directory index of this address.
    #[inline]
    pub const fn table_index(self) -> usize {
        self.0 / PT_SIZE
    }

    /// Offset inside the containing page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// True when the address sits on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// True when the address lies below [`UTOP`].
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < UTOP
    }

    /// Address `bytes` further up, or `None` on overflow.
    #[inline]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Address `bytes` further up. Callers guarantee the sum stays in range.
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<usize> for VirtAddr {
    #[inline]
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}

/// Environment identifier: a generation counter above the table slot index.
///
/// **Invariant**: the value 0 never names a live environment; syscalls read it
/// as "the calling environment", and `exofork` returns it in the child.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// The calling environment, in syscall arguments.
    pub const CURRENT: Self = Self(0);

    /// Wraps a raw id word.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id word.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Table slot this id refers to.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize & (NENV - 1)
    }

    /// True for the "calling environment" alias.
    #[inline]
    pub const fn is_current(self) -> bool {
        self.0 == 0
    }

    /// Produces the id for the next occupancy of slot `index`, given the id
    /// its previous occupant held (0 for a never-used slot).
    pub const fn next_generation(previous: Self, index: usize) -> Self {
        let mut generation = previous.0.wrapping_add(1 << ENVGENSHIFT) & !(NENV as u32 - 1);
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        Self(generation | index as u32)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// User entry point the kernel redirects to when delivering a page fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct UpcallEntry(VirtAddr);

impl UpcallEntry {
    /// Entry at `entry`.
    #[inline]
    pub const fn new(entry: VirtAddr) -> Self {
        Self(entry)
    }

    /// Address execution resumes at.
    #[inline]
    pub const fn addr(self) -> VirtAddr {
        self.0
    }
}
