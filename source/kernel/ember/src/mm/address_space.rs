// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level user address space: a directory frame, page-table frames allocated
//! on demand per 4 MiB region, and leaf entries pointing at shared frames.

use alloc::{collections::BTreeMap, vec::Vec};

use ember_abi::layout::UTOP;
use ember_abi::{FaultCause, PageFlags, VirtAddr};

use super::{FrameAllocator, FrameId, MapError};

/// Leaf page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    pub frame: FrameId,
    pub flags: PageFlags,
}

/// User half of an environment's page tables.
#[derive(Debug)]
pub struct AddressSpace {
    root: FrameId,
    tables: BTreeMap<usize, FrameId>,
    entries: BTreeMap<usize, Pte>,
}

impl AddressSpace {
    /// Allocates the directory frame of a new, empty address space.
    pub fn new(frames: &mut FrameAllocator) -> Result<Self, MapError> {
        let root = frames.alloc()?;
        frames.incref(root);
        Ok(Self { root, tables: BTreeMap::new(), entries: BTreeMap::new() })
    }

    /// True when a page table covers the region containing `va`.
    pub fn has_table(&self, va: VirtAddr) -> bool {
        self.tables.contains_key(&va.table_index())
    }

    /// Entry mapping the page containing `va`.
    pub fn lookup(&self, va: VirtAddr) -> Option<Pte> {
        self.entries.get(&va.page_number()).copied()
    }

    /// Number of leaf entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maps `frame` at `va`, replacing (and releasing) any previous entry.
    ///
    /// Re-inserting the frame already mapped at `va` only updates the flags.
    pub fn insert(
        &mut self,
        frames: &mut FrameAllocator,
        va: VirtAddr,
        frame: FrameId,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::Unaligned);
        }
        if va.raw() >= UTOP {
            return Err(MapError::OutOfRange);
        }
        if !flags.is_present() {
            return Err(MapError::InvalidFlags);
        }
        self.ensure_table(frames, va)?;
        frames.incref(frame);
        if let Some(old) = self.entries.insert(va.page_number(), Pte { frame, flags }) {
            frames.decref(old.frame);
        }
        Ok(())
    }

    /// Removes the entry at `va`; silently succeeds when nothing is mapped.
    pub fn remove(&mut self, frames: &mut FrameAllocator, va: VirtAddr) -> Option<Pte> {
        let old = self.entries.remove(&va.page_number())?;
        frames.decref(old.frame);
        Some(old)
    }

    /// Rewrites the flags of an existing entry.
    pub fn set_flags(&mut self, va: VirtAddr, flags: PageFlags) -> Result<(), MapError> {
        if !flags.is_present() {
            return Err(MapError::InvalidFlags);
        }
        let pte = self.entries.get_mut(&va.page_number()).ok_or(MapError::NotMapped)?;
        pte.flags = flags;
        Ok(())
    }

    /// Entries whose page start lies in `[start, end)`, in address order.
    pub fn mappings(&self, start: VirtAddr, end: VirtAddr) -> Vec<(VirtAddr, Pte)> {
        self.entries
            .range(start.page_number()..end.page_number().max(start.page_number()))
            .map(|(&vpn, &pte)| (VirtAddr::new(vpn * ember_abi::PAGE_SIZE), pte))
            .collect()
    }

    /// Iterates over every leaf entry in address order.
    pub fn iter(&self) -> impl Iterator<Item = (VirtAddr, Pte)> + '_ {
        self.entries.iter().map(|(&vpn, &pte)| (VirtAddr::new(vpn * ember_abi::PAGE_SIZE), pte))
    }

    /// Directory and page-table frames owned by this address space.
    pub fn table_frames(&self) -> impl Iterator<Item = FrameId> + '_ {
        core::iter::once(self.root).chain(self.tables.values().copied())
    }

    /// Checks a user access to `va` the way the MMU would.
    pub fn check_access(&self, va: VirtAddr, write: bool) -> Result<Pte, FaultCause> {
        let mut cause = FaultCause::USER;
        if write {
            cause |= FaultCause::WRITE;
        }
        if va.raw() >= UTOP {
            return Err(cause | FaultCause::PROTECTION);
        }
        let pte = self.lookup(va).ok_or(cause)?;
        if !pte.flags.is_user() || (write && !pte.flags.is_writable()) {
            return Err(cause | FaultCause::PROTECTION);
        }
        Ok(pte)
    }

    /// Releases every frame this address space references, including its tables.
    pub fn teardown(self, frames: &mut FrameAllocator) {
        for pte in self.entries.values() {
            frames.decref(pte.frame);
        }
        for &table in self.tables.values() {
            frames.decref(table);
        }
        frames.decref(self.root);
    }

    fn ensure_table(&mut self, frames: &mut FrameAllocator, va: VirtAddr) -> Result<(), MapError> {
        let pdx = va.table_index();
        if self.tables.contains_key(&pdx) {
            return Ok(());
        }
        let table = frames.alloc()?;
        frames.incref(table);
        self.tables.insert(pdx, table);
        Ok(())
    }
}
