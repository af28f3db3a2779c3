// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table entry permissions and page-fault cause bits.

use core::fmt;

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    /// Permission bits carried by a user page-table entry.
    pub struct PageFlags: u32 {
        /// Entry is present.
        const PRESENT = 1 << 0;
        /// Page may be written.
        const WRITABLE = 1 << 1;
        /// Page is reachable from user mode.
        const USER = 1 << 2;
        /// Software bit: page is shared copy-on-write.
        const COW = 1 << 11;
        /// Bits reserved for software use (includes [`PageFlags::COW`]).
        const AVAIL = 0x0e00;
        /// Every bit a user environment may request through a syscall.
        const SYSCALL = Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits()
            | Self::AVAIL.bits();
    }
}

impl PageFlags {
    /// `USER | PRESENT`: read-only user page.
    pub const USER_RO: Self = Self::USER.union(Self::PRESENT);
    /// `USER | WRITABLE | PRESENT`: private writable user page.
    pub const USER_RW: Self = Self::USER.union(Self::WRITABLE).union(Self::PRESENT);
    /// `USER | PRESENT | COW`: shared copy-on-write page.
    pub const USER_COW: Self = Self::USER.union(Self::PRESENT).union(Self::COW);

    /// True when the entry is present.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// True when the entry allows writes.
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// True when the entry is user accessible.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// True when the entry is marked copy-on-write.
    #[inline]
    pub const fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }

    /// True when the bits are acceptable as a syscall permission argument:
    /// `USER | PRESENT` must be set and nothing outside [`PageFlags::SYSCALL`].
    #[inline]
    pub const fn is_valid_syscall_perm(self) -> bool {
        self.contains(Self::USER_RO) && Self::SYSCALL.contains(self)
    }

    /// A page is never writable and copy-on-write at the same time.
    #[inline]
    pub const fn is_cow_consistent(self) -> bool {
        !(self.is_cow() && self.is_writable())
    }
}

/// Renders the monitor's `owner:access` notation, e.g. `user:W/R` or `kern:RO`.
impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = if self.is_user() { "user" } else { "kern" };
        let access = if self.is_writable() { "W/R" } else { "RO" };
        write!(f, "{owner}:{access}")?;
        if self.is_cow() {
            f.write_str("+COW")?;
        }
        Ok(())
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    /// Page-fault error code as reported by the MMU.
    pub struct FaultCause: u32 {
        /// Fault was a protection violation (page present); clear means not-present.
        const PROTECTION = 1 << 0;
        /// Faulting access was a write.
        const WRITE = 1 << 1;
        /// Fault happened in user mode.
        const USER = 1 << 2;
    }
}

impl FaultCause {
    /// True when the faulting access was a write.
    #[inline]
    pub const fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_covers_every_owner_and_access() {
        assert_eq!(PageFlags::USER_RW.to_string(), "user:W/R");
        assert_eq!(PageFlags::USER_RO.to_string(), "user:RO");
        assert_eq!((PageFlags::PRESENT | PageFlags::WRITABLE).to_string(), "kern:W/R");
        assert_eq!(PageFlags::PRESENT.to_string(), "kern:RO");
        assert_eq!(PageFlags::USER_COW.to_string(), "user:RO+COW");
    }

    #[test]
    fn syscall_perm_validation() {
        assert!(PageFlags::USER_RO.is_valid_syscall_perm());
        assert!(PageFlags::USER_RW.is_valid_syscall_perm());
        assert!(PageFlags::USER_COW.is_valid_syscall_perm());
        assert!(!PageFlags::PRESENT.is_valid_syscall_perm());
        assert!(!PageFlags::USER.is_valid_syscall_perm());
        assert!(!PageFlags::from_bits_retain(0x1005).is_valid_syscall_perm());
    }

    #[test]
    fn cow_never_writable() {
        assert!(PageFlags::USER_COW.is_cow_consistent());
        assert!(!(PageFlags::USER_COW | PageFlags::WRITABLE).is_cow_consistent());
    }
}
