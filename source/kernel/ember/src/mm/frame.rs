// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted physical frame pool.
//!
//! Frame contents are materialised lazily on first allocation so a large pool
//! costs nothing until it is used.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use ember_abi::PAGE_SIZE;

use super::MapError;

/// Index of a physical page frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FrameId(u32);

impl FrameId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Physical address of the frame.
    #[inline]
    pub const fn phys_addr(self) -> usize {
        self.as_index() * PAGE_SIZE
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.phys_addr())
    }
}

#[derive(Default)]
struct Frame {
    refs: u32,
    data: Option<Box<[u8; PAGE_SIZE]>>,
}

/// Pool of page frames with per-frame reference counts.
pub struct FrameAllocator {
    frames: Vec<Frame>,
    free: Vec<FrameId>,
    #[cfg(feature = "failpoints")]
    deny_next: bool,
}

impl FrameAllocator {
    /// Creates a pool of `count` frames; the lowest-numbered frame is handed out first.
    pub fn new(count: usize) -> Self {
        let frames = (0..count).map(|_| Frame::default()).collect();
        let free = (0..count as u32).rev().map(FrameId).collect();
        Self {
            frames,
            free,
            #[cfg(feature = "failpoints")]
            deny_next: false,
        }
    }

    /// Takes a zeroed frame off the free list. The frame starts with no references.
    pub fn alloc(&mut self) -> Result<FrameId, MapError> {
        #[cfg(feature = "failpoints")]
        if core::mem::take(&mut self.deny_next) {
            return Err(MapError::NoMem);
        }
        let id = self.free.pop().ok_or(MapError::NoMem)?;
        let frame = &mut self.frames[id.as_index()];
        match frame.data.as_mut() {
            Some(data) => data.fill(0),
            None => frame.data = Some(Box::new([0u8; PAGE_SIZE])),
        }
        Ok(id)
    }

    /// Adds a reference to `id`.
    pub fn incref(&mut self, id: FrameId) {
        self.frames[id.as_index()].refs += 1;
    }

    /// Drops a reference to `id`, returning the frame to the pool at zero.
    pub fn decref(&mut self, id: FrameId) {
        let frame = &mut self.frames[id.as_index()];
        debug_assert!(frame.refs > 0, "decref of unreferenced frame {id}");
        frame.refs = frame.refs.saturating_sub(1);
        if frame.refs == 0 {
            self.free.push(id);
        }
    }

    /// Returns a freshly allocated frame that never gained a reference.
    pub fn release_unused(&mut self, id: FrameId) {
        if self.frames[id.as_index()].refs == 0 && !self.free.contains(&id) {
            self.free.push(id);
        }
    }

    pub fn refs(&self, id: FrameId) -> u32 {
        self.frames.get(id.as_index()).map_or(0, |frame| frame.refs)
    }

    /// Number of frames currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Contents of `id`. Frames that were never allocated read as zero.
    pub fn data(&self, id: FrameId) -> &[u8; PAGE_SIZE] {
        const ZERO: [u8; PAGE_SIZE] = [0; PAGE_SIZE];
        match self.frames[id.as_index()].data.as_deref() {
            Some(data) => data,
            None => &ZERO,
        }
    }

    /// Mutable contents of `id`, materialising the frame if needed.
    pub fn data_mut(&mut self, id: FrameId) -> &mut [u8; PAGE_SIZE] {
        self.frames[id.as_index()].data.get_or_insert_with(|| Box::new([0u8; PAGE_SIZE]))
    }

    /// Forces the next [`FrameAllocator::alloc`] to fail with [`MapError::NoMem`].
    #[cfg(feature = "failpoints")]
    pub fn deny_next_alloc(&mut self) {
        self.deny_next = true;
    }
}
