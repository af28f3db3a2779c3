// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous IPC helpers over ipc_try_send/ipc_recv
//! OWNERS: @runtime
//! PUBLIC API: send, try_send, recv, Received, IpcError, find_env
//! DEPENDS_ON: ember_abi::UserEnv
//! INVARIANTS: A sender retries only on IpcNotRecv and yields between attempts; every
//!             other send failure is fatal

use ember_abi::{EnvId, EnvStatus, EnvType, PageFlags, SysError, UserEnv, UserSpace, VirtAddr};
use thiserror::Error;

/// A delivered message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Received {
    /// The word sent.
    pub value: u32,
    /// Sender id.
    pub from: EnvId,
    /// Permission of the transferred page; empty when no page moved.
    pub perm: PageFlags,
}

/// IPC failure other than "receiver not ready".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// The kernel rejected the send.
    #[error("send to {to} failed: {source}")]
    Send {
        /// Destination.
        to: EnvId,
        /// Kernel error.
        #[source]
        source: SysError,
    },
    /// The receive itself failed.
    #[error("receive failed: {0}")]
    Recv(#[source] SysError),
}

/// Blocks until a message arrives. A sent page is mapped at `page` when given.
pub fn recv<S: UserEnv + ?Sized>(sys: &mut S, page: Option<VirtAddr>) -> Result<Received, IpcError> {
    sys.ipc_recv(page).map_err(IpcError::Recv)?;
    let me = sys.this_env();
    let from = me.ipc_from.ok_or(IpcError::Recv(SysError::Unspecified))?;
    Ok(Received { value: me.ipc_value, from, perm: me.ipc_perm })
}

/// Sends `value` (and the page at `page`, if any) to `to`, aborting the caller on failure.
pub fn send<S: UserEnv + ?Sized>(
    sys: &mut S,
    to: EnvId,
    value: u32,
    page: Option<VirtAddr>,
    perm: PageFlags,
) {
    if let Err(err) = try_send(sys, to, value, page, perm) {
        crate::abort(sys, &err);
    }
}

/// Sends, yielding and retrying while `to` is not receiving.
///
/// Returns the first error other than [`SysError::IpcNotRecv`].
pub fn try_send<S: UserEnv + ?Sized>(
    sys: &mut S,
    to: EnvId,
    value: u32,
    page: Option<VirtAddr>,
    perm: PageFlags,
) -> Result<(), IpcError> {
    loop {
        match sys.ipc_try_send(to, value, page, perm) {
            Ok(()) => return Ok(()),
            Err(SysError::IpcNotRecv) => sys.yield_cpu(),
            Err(source) => {
                log::warn!(target: "ipc", "send to {} failed: {}", to, source);
                return Err(IpcError::Send { to, source });
            }
        }
    }
}

/// First live environment of type `env_type`, by table order.
pub fn find_env<S: UserSpace + ?Sized>(sys: &S, env_type: EnvType) -> Option<EnvId> {
    (0..sys.env_count())
        .filter_map(|index| sys.env_at(index))
        .find(|env| env.status != EnvStatus::Free && env.env_type == env_type)
        .map(|env| env.id)
}
