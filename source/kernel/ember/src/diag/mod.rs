// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel diagnostics: leveled logging and state audits.

#[macro_use]
pub mod log;

pub mod audit;
