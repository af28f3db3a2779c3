// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frames and per-environment user address spaces
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameAllocator, FrameId, AddressSpace, Pte, MapError
//! DEPENDS_ON: ember_abi::{PageFlags, FaultCause, layout}
//! INVARIANTS: A frame's reference count equals the number of entries (and page-table
//!             slots) pointing at it; a frame with no references sits on the free list

pub mod address_space;
pub mod frame;

pub use address_space::{AddressSpace, Pte};
pub use frame::{FrameAllocator, FrameId};

use ember_abi::SysError;

/// Error returned by mapping operations.
#[must_use = "mapping errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Virtual address is not page aligned.
    Unaligned,
    /// Mapping lies at or above the top of user memory.
    OutOfRange,
    /// Provided flags are not suitable for installing a mapping.
    InvalidFlags,
    /// No entry is installed at the address.
    NotMapped,
    /// No free frame for the page or its page table.
    NoMem,
}

impl From<MapError> for SysError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::NoMem => SysError::NoMem,
            MapError::Unaligned
            | MapError::OutOfRange
            | MapError::InvalidFlags
            | MapError::NotMapped => SysError::Inval,
        }
    }
}
