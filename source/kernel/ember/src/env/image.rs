// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pre-parsed user program images loaded by `Kernel::env_create`.

use alloc::vec::Vec;

use ember_abi::VirtAddr;

/// One loadable segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Load address; need not be page aligned.
    pub va: VirtAddr,
    /// File-backed bytes copied to `va`.
    pub data: Vec<u8>,
    /// Size in memory; bytes past `data.len()` are zero-filled.
    pub mem_size: usize,
    /// Whether the segment's pages are mapped writable.
    pub writable: bool,
}

impl Segment {
    /// Read-only segment (program text).
    pub fn text(va: usize, data: &[u8]) -> Self {
        Self { va: VirtAddr::new(va), data: data.to_vec(), mem_size: data.len(), writable: false }
    }

    /// Writable segment with `mem_size` bytes in memory.
    pub fn data(va: usize, data: &[u8], mem_size: usize) -> Self {
        Self {
            va: VirtAddr::new(va),
            data: data.to_vec(),
            mem_size: mem_size.max(data.len()),
            writable: true,
        }
    }

    /// Exclusive end of the segment in memory.
    pub fn end(&self) -> Option<VirtAddr> {
        self.va.checked_add(self.mem_size)
    }
}

/// A program: entry point plus its segments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramImage {
    pub entry: VirtAddr,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry: usize) -> Self {
        Self { entry: VirtAddr::new(entry), segments: Vec::new() }
    }

    #[must_use]
    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }
}
