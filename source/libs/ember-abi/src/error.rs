// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall error kinds and their stable wire codes.

use thiserror::Error;

/// Error returned by every fallible syscall.
///
/// On the wire each variant travels as the negated [`SysError::code`] in the
/// caller's return register.
#[must_use = "syscall errors must be handled"]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
pub enum SysError {
    /// Unspecified or unknown problem.
    #[error("unspecified error")]
    Unspecified,
    /// Environment does not exist or the caller lacks permission over it.
    #[error("bad environment")]
    BadEnv,
    /// Invalid parameter.
    #[error("invalid parameter")]
    Inval,
    /// Request failed due to memory shortage.
    #[error("out of memory")]
    NoMem,
    /// Attempt to create a new environment beyond the maximum allowed.
    #[error("out of environments")]
    NoFreeEnv,
    /// Memory fault.
    #[error("segmentation fault")]
    Fault,
    /// Target environment is not waiting in `ipc_recv`.
    #[error("env is not recving")]
    IpcNotRecv,
}

impl SysError {
    /// Positive error code of this kind.
    pub const fn code(self) -> u32 {
        match self {
            Self::Unspecified => 1,
            Self::BadEnv => 2,
            Self::Inval => 3,
            Self::NoMem => 4,
            Self::NoFreeEnv => 5,
            Self::Fault => 6,
            Self::IpcNotRecv => 7,
        }
    }

    /// Decodes a positive error code; unknown codes map to `Unspecified`.
    pub const fn from_code(code: u32) -> Self {
        match code {
            2 => Self::BadEnv,
            3 => Self::Inval,
            4 => Self::NoMem,
            5 => Self::NoFreeEnv,
            6 => Self::Fault,
            7 => Self::IpcNotRecv,
            _ => Self::Unspecified,
        }
    }

    /// Encodes a syscall result into the caller's return register.
    pub const fn encode(result: Result<u32, Self>) -> u32 {
        match result {
            Ok(value) => value,
            Err(err) => (err.code() as i32).wrapping_neg() as u32,
        }
    }

    /// Decodes a return register: negative words are errors.
    pub const fn decode(word: u32) -> Result<u32, Self> {
        let signed = word as i32;
        if signed < 0 {
            Err(Self::from_code(signed.wrapping_neg() as u32))
        } else {
            Ok(word)
        }
    }
}
