// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User virtual memory layout shared by the kernel and the user runtime.
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                      |     user exception stack     |  PAGE_SIZE
//!                      +------------------------------+ 0xeebff000
//!                      |        empty guard page      |  PAGE_SIZE
//!        USTACKTOP --> +------------------------------+ 0xeebfe000
//!                      |      normal user stack       |
//!                      :              .               :
//!                      |  program data, heap, text    |
//!            UTEXT --> +------------------------------+ 0x00800000
//!           PFTEMP --> |  scratch page for COW copies | 0x007ff000
//!                      :              .               :
//!            UTEMP --> +------------------------------+ 0x00400000
//! ```

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Bytes mapped by one page-table page (one page-directory entry).
pub const PT_SIZE: usize = 1024 * PAGE_SIZE;

/// Top of user-accessible virtual memory; nothing at or above is user-mappable.
pub const UTOP: usize = 0xeec0_0000;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: usize = UTOP;
/// Top of the normal user stack (one guard page below the exception stack).
pub const USTACKTOP: usize = UTOP - 2 * PAGE_SIZE;
/// Lowest address of user program text.
pub const UTEXT: usize = 2 * PT_SIZE;
/// Scratch region usable by user code for temporary mappings.
pub const UTEMP: usize = PT_SIZE;
/// Scratch page the COW fault resolver copies through.
pub const PFTEMP: usize = UTEMP + PT_SIZE - PAGE_SIZE;

/// Bits of an environment id used for the table slot.
pub const LOG2NENV: u32 = 10;
/// Maximum number of environment slots addressable by an id.
pub const NENV: usize = 1 << LOG2NENV;
/// Shift of the generation counter inside an environment id.
pub const ENVGENSHIFT: u32 = 12;
