// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for environment-table allocation and id resolution
//! OWNERS: @kernel-env-team

use ember_abi::{EnvId, EnvStatus, SysError};

use super::EnvTable;
use crate::mm::FrameAllocator;

fn setup(slots: usize) -> (EnvTable, FrameAllocator) {
    (EnvTable::new(slots), FrameAllocator::new(64))
}

#[test]
fn allocates_in_index_order() {
    let (mut envs, mut frames) = setup(4);
    assert_eq!(envs.alloc(&mut frames, None), Ok(0));
    assert_eq!(envs.alloc(&mut frames, None), Ok(1));
    assert_eq!(envs.get(1).map(|e| e.status), Some(EnvStatus::Runnable));
}

#[test]
fn exhausted_table_reports_no_free_env() {
    let (mut envs, mut frames) = setup(2);
    envs.alloc(&mut frames, None).expect("first");
    envs.alloc(&mut frames, None).expect("second");
    assert_eq!(envs.alloc(&mut frames, None), Err(SysError::NoFreeEnv));
}

#[test]
fn freed_slot_is_reused_with_new_generation() {
    let (mut envs, mut frames) = setup(4);
    let index = envs.alloc(&mut frames, None).expect("alloc");
    let old_id = envs.get(index).map(|e| e.id).expect("id");
    envs.free(&mut frames, index);
    assert_eq!(envs.lookup(old_id, None, false), Err(SysError::BadEnv));

    let again = envs.alloc(&mut frames, None).expect("realloc");
    assert_eq!(again, index);
    let new_id = envs.get(again).map(|e| e.id).expect("id");
    assert_ne!(new_id, old_id);
    assert_eq!(new_id.index(), index);
    assert_eq!(envs.lookup(old_id, None, false), Err(SysError::BadEnv));
}

#[test]
fn free_returns_address_space_frames() {
    let (mut envs, mut frames) = setup(2);
    let before = frames.free_count();
    let index = envs.alloc(&mut frames, None).expect("alloc");
    assert_eq!(frames.free_count(), before - 1);
    envs.free(&mut frames, index);
    assert_eq!(frames.free_count(), before);
    assert!(envs.get(index).is_some_and(|e| e.space.is_none()));
}

#[test]
fn lookup_enforces_self_or_child() {
    let (mut envs, mut frames) = setup(4);
    let parent = envs.alloc(&mut frames, None).expect("parent");
    let parent_id = envs.get(parent).map(|e| e.id).expect("id");
    let child = envs.alloc(&mut frames, Some(parent_id)).expect("child");
    let child_id = envs.get(child).map(|e| e.id).expect("id");
    let stranger = envs.alloc(&mut frames, None).expect("stranger");
    let stranger_id = envs.get(stranger).map(|e| e.id).expect("id");

    assert_eq!(envs.lookup(EnvId::CURRENT, Some(parent), true), Ok(parent));
    assert_eq!(envs.lookup(child_id, Some(parent), true), Ok(child));
    assert_eq!(envs.lookup(stranger_id, Some(parent), true), Err(SysError::BadEnv));
    assert_eq!(envs.lookup(stranger_id, Some(parent), false), Ok(stranger));
    // Children have no authority over their parent.
    assert_eq!(envs.lookup(parent_id, Some(child), true), Err(SysError::BadEnv));
    assert_eq!(envs.lookup(EnvId::CURRENT, None, false), Err(SysError::BadEnv));
}
