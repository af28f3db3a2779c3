// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for kernel-wide invariants under random event mixes
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - No environment is ever dispatched on two CPUs at once
//!   - Every Running environment is some CPU's current environment
//!   - Frame reference counts always match the page tables; no page is COW and writable
//!
//! TEST_SCENARIOS:
//!   - random_events_preserve_invariants(): yields, timer ticks, receives, sends,
//!     page allocations, shares, forks, destroys, and status changes across three CPUs

use ember_abi::{EnvId, EnvStatus, EnvType, PageFlags, VirtAddr, PAGE_SIZE};
use proptest::prelude::*;

use crate::config::KernelConfig;
use crate::env::image::{ProgramImage, Segment};
use crate::kernel::Kernel;
use crate::syscall::Syscall;
use crate::types::CpuId;

#[derive(Clone, Debug)]
enum Event {
    Yield(u16),
    Tick(u16),
    Recv(u16, bool),
    Send(u16, usize, u32, bool),
    Alloc(u16, usize),
    Share(u16, usize, bool),
    Fork(u16),
    Destroy(u16, usize),
    SetStatus(u16, usize, bool),
}

const NCPU: u16 = 3;
const SCRATCH: usize = 0x0040_0000;

fn arb_event() -> impl Strategy<Value = Event> {
    let cpu = 0..NCPU;
    prop_oneof![
        cpu.clone().prop_map(Event::Yield),
        cpu.clone().prop_map(Event::Tick),
        (cpu.clone(), any::<bool>()).prop_map(|(c, page)| Event::Recv(c, page)),
        (cpu.clone(), 0usize..8, any::<u32>(), any::<bool>())
            .prop_map(|(c, to, value, page)| Event::Send(c, to, value, page)),
        (cpu.clone(), 0usize..4).prop_map(|(c, page)| Event::Alloc(c, page)),
        (cpu.clone(), 0usize..4, any::<bool>()).prop_map(|(c, page, cow)| Event::Share(c, page, cow)),
        cpu.clone().prop_map(Event::Fork),
        (cpu.clone(), 0usize..8).prop_map(|(c, victim)| Event::Destroy(c, victim)),
        (cpu, 0usize..8, any::<bool>())
            .prop_map(|(c, target, runnable)| Event::SetStatus(c, target, runnable)),
    ]
}

fn page(index: usize) -> VirtAddr {
    VirtAddr::new(SCRATCH + index * PAGE_SIZE)
}

fn live_id(k: &Kernel, slot: usize) -> EnvId {
    k.env_at(slot)
        .filter(|info| info.status != EnvStatus::Free)
        .map_or(EnvId::from_raw(0x7fff_f000), |info| info.id)
}

fn apply(k: &Kernel, event: &Event) {
    match *event {
        Event::Yield(c) => {
            k.syscall(CpuId::from_raw(c), Syscall::Yield);
        }
        Event::Tick(c) => {
            k.interrupt(CpuId::from_raw(c));
        }
        Event::Recv(c, want) => {
            let dst = want.then(|| page(3));
            k.syscall(CpuId::from_raw(c), Syscall::IpcRecv { dst });
        }
        Event::Send(c, to, value, with_page) => {
            let to = live_id(k, to);
            let page = with_page.then(|| page(0));
            let perm = PageFlags::USER_RO;
            k.syscall(CpuId::from_raw(c), Syscall::IpcTrySend { to, value, page, perm });
        }
        Event::Alloc(c, index) => {
            k.syscall(
                CpuId::from_raw(c),
                Syscall::PageAlloc { env: EnvId::CURRENT, va: page(index), perm: PageFlags::USER_RW },
            );
        }
        Event::Share(c, index, cow) => {
            let perm = if cow { PageFlags::USER_COW } else { PageFlags::USER_RO };
            k.syscall(
                CpuId::from_raw(c),
                Syscall::PageMap {
                    src: EnvId::CURRENT,
                    src_va: page(index),
                    dst: EnvId::CURRENT,
                    dst_va: page((index + 1) % 4),
                    perm,
                },
            );
        }
        Event::Fork(c) => {
            let cpu = CpuId::from_raw(c);
            if let crate::SyscallOutcome::Return(Ok(raw)) = k.syscall(cpu, Syscall::Exofork) {
                let child = EnvId::from_raw(raw);
                k.syscall(
                    cpu,
                    Syscall::PageMap {
                        src: EnvId::CURRENT,
                        src_va: VirtAddr::new(0x0080_0000),
                        dst: child,
                        dst_va: VirtAddr::new(0x0080_0000),
                        perm: PageFlags::USER_RO,
                    },
                );
                k.syscall(cpu, Syscall::EnvSetStatus { env: child, status: EnvStatus::Runnable });
            }
        }
        Event::Destroy(c, victim) => {
            let _ = k.env_destroy(CpuId::from_raw(c), live_id(k, victim));
        }
        Event::SetStatus(c, target, runnable) => {
            let status = if runnable { EnvStatus::Runnable } else { EnvStatus::NotRunnable };
            let env = if target == 0 { EnvId::CURRENT } else { live_id(k, target) };
            k.syscall(CpuId::from_raw(c), Syscall::EnvSetStatus { env, status });
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_events_preserve_invariants(events in proptest::collection::vec(arb_event(), 1..80)) {
        let config = KernelConfig::default().with_envs(8).with_cpus(NCPU as usize).with_frames(512);
        let k = Kernel::new(config).expect("kernel");
        let image = ProgramImage::new(0x0080_0020).with_segment(Segment::text(0x0080_0000, &[0xcc; 16]));
        for _ in 0..4 {
            k.env_create(&image, EnvType::User).expect("create");
        }
        for c in 0..NCPU {
            let cpu = CpuId::from_raw(c);
            k.start_cpu(cpu);
            k.schedule(cpu);
        }
        prop_assert_eq!(k.audit(), Ok(()));
        for event in &events {
            apply(&k, event);
            prop_assert_eq!(k.audit(), Ok(()), "after {:?}", event);
        }
    }
}
