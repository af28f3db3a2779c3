// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hosted harness running user programs against the real kernel on one CPU
//! OWNERS: @runtime
//! NOTE: Tests only.
//!
//! Every environment is driven by its own host thread. A thread only executes while its
//! environment is the CPU's current one and Running; everywhere else it parks. Blocking
//! and yielding syscalls therefore hand the CPU to whichever thread the kernel dispatched.

#![allow(dead_code)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ember::{
    CpuId, FaultOutcome, Kernel, KernelConfig, ProgramImage, Segment, Syscall, SyscallOutcome,
};
use ember_abi::layout::UTEXT;
use ember_abi::sys::{PageFault, Syscalls, UserSpace};
use ember_abi::{
    EnvId, EnvInfo, EnvStatus, EnvType, PageFlags, SysError, UpcallEntry, VirtAddr, PAGE_SIZE,
};

pub const CPU: CpuId = CpuId::BOOT;
/// First page of the writable data segment every test program gets.
pub const DATA: VirtAddr = VirtAddr::new(UTEXT + PAGE_SIZE);
const PARK_TIMEOUT: Duration = Duration::from_secs(10);

/// Unwind payload used when the running environment no longer exists.
pub struct Killed;

pub type Program = Box<dyn FnOnce(&mut UserCtx) + Send + 'static>;

pub struct World {
    kernel: Arc<Kernel>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    pending: Vec<(EnvId, Program)>,
}

impl World {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            kernel: Arc::new(Kernel::new(config.with_cpus(1)).expect("kernel")),
            threads: Arc::new(Mutex::new(Vec::new())),
            pending: Vec::new(),
        }
    }

    pub fn small() -> Self {
        Self::new(KernelConfig::default().with_envs(8).with_frames(256))
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Creates an environment whose program starts once the world runs.
    pub fn spawn<F>(&mut self, env_type: EnvType, program: F) -> EnvId
    where
        F: FnOnce(&mut UserCtx) + Send + 'static,
    {
        let image = ProgramImage::new(UTEXT + 0x20)
            .with_segment(Segment::text(UTEXT, &[0xcc; 64]))
            .with_segment(Segment::data(DATA.raw(), &[0; 16], 2 * PAGE_SIZE));
        let env = self.kernel.env_create(&image, env_type).expect("env_create");
        self.pending.push((env, Box::new(program)));
        env
    }

    /// Dispatches the CPU and waits for every environment thread, forked ones included.
    pub fn run(mut self) -> Arc<Kernel> {
        for (env, program) in self.pending.drain(..) {
            start(&self.kernel, &self.threads, env, program);
        }
        self.kernel.schedule(CPU);
        loop {
            let next = self.threads.lock().expect("threads").pop();
            let Some(handle) = next else { break };
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }
        }
        self.kernel
    }
}

fn start(
    kernel: &Arc<Kernel>,
    threads: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    env: EnvId,
    program: Program,
) {
    let mut ctx = UserCtx {
        kernel: Arc::clone(kernel),
        threads: Arc::clone(threads),
        me: env,
        on_fork: None,
        starve_child: false,
        faults: 0,
    };
    let handle = thread::spawn(move || {
        let body = AssertUnwindSafe(|| {
            ctx.park();
            program(&mut ctx);
            ctx.exit();
        });
        if let Err(payload) = panic::catch_unwind(body) {
            if !payload.is::<Killed>() {
                panic::resume_unwind(payload);
            }
        }
    });
    threads.lock().expect("threads").push(handle);
}

/// One environment's view of the machine.
pub struct UserCtx {
    kernel: Arc<Kernel>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    me: EnvId,
    on_fork: Option<Program>,
    starve_child: bool,
    faults: usize,
}

impl UserCtx {
    pub fn id(&self) -> EnvId {
        self.me
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Page faults this environment has taken.
    pub fn faults(&self) -> usize {
        self.faults
    }

    /// Program the next child created by `exofork` runs.
    pub fn on_fork<F>(&mut self, child: F)
    where
        F: FnOnce(&mut UserCtx) + Send + 'static,
    {
        self.on_fork = Some(Box::new(child));
    }

    /// Makes the first frame allocation after the next successful `exofork` fail.
    pub fn starve_next_child(&mut self) {
        self.starve_child = true;
    }

    /// Store that takes page faults through the registered upcall, like the MMU would.
    pub fn store(&mut self, va: VirtAddr, data: &[u8]) {
        loop {
            match self.kernel.user_write(CPU, va, data) {
                Ok(()) => return,
                Err(fault) => self.take_fault(fault),
            }
        }
    }

    pub fn load(&mut self, va: VirtAddr, buf: &mut [u8]) {
        if let Err(fault) = self.kernel.user_read(CPU, va, buf) {
            self.take_fault(fault);
            unreachable!("read fault at {} was resolved", fault.va);
        }
    }

    pub fn store_u32(&mut self, va: VirtAddr, value: u32) {
        self.store(va, &value.to_le_bytes());
    }

    pub fn load_u32(&mut self, va: VirtAddr) -> u32 {
        let mut buf = [0u8; 4];
        self.load(va, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn take_fault(&mut self, fault: PageFault) {
        self.faults += 1;
        match self.kernel.page_fault(CPU, fault) {
            FaultOutcome::Upcall { utf, .. } => {
                ember_ulib::handle_fault(self, &utf);
                self.kernel.upcall_return(CPU, &utf).expect("upcall return");
            }
            FaultOutcome::Destroyed(_) => panic::panic_any(Killed),
        }
    }

    fn park(&self) {
        let deadline = Instant::now() + PARK_TIMEOUT;
        loop {
            let Some(info) = self.kernel.env_info(self.me) else {
                panic::panic_any(Killed);
            };
            if info.status == EnvStatus::Running && self.kernel.current(CPU) == Some(self.me) {
                return;
            }
            assert!(Instant::now() < deadline, "env {} never dispatched again", self.me);
            thread::yield_now();
        }
    }

    fn exit(&mut self) {
        let _ = self.env_destroy(EnvId::CURRENT);
    }

    fn call(&mut self, call: Syscall) -> Result<u32, SysError> {
        match self.kernel.syscall(CPU, call) {
            SyscallOutcome::Return(result) => result,
            SyscallOutcome::Reschedule(_) => {
                self.park();
                let frame = self.kernel.saved_frame(self.me).expect("saved frame");
                SysError::decode(frame.syscall_return())
            }
        }
    }
}

impl Syscalls for UserCtx {
    fn getenvid(&mut self) -> EnvId {
        EnvId::from_raw(self.call(Syscall::GetEnvId).expect("getenvid"))
    }

    fn yield_cpu(&mut self) {
        let _ = self.call(Syscall::Yield);
    }

    fn env_destroy(&mut self, env: EnvId) -> Result<(), SysError> {
        self.call(Syscall::EnvDestroy { env }).map(drop)
    }

    fn exofork(&mut self) -> Result<EnvId, SysError> {
        let child = EnvId::from_raw(self.call(Syscall::Exofork)?);
        let program = self.on_fork.take().unwrap_or_else(|| Box::new(|_: &mut UserCtx| {}));
        start(&self.kernel, &self.threads, child, program);
        if std::mem::take(&mut self.starve_child) {
            self.kernel.deny_next_frame_alloc();
        }
        Ok(child)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.call(Syscall::EnvSetStatus { env, status }).map(drop)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry) -> Result<(), SysError> {
        self.call(Syscall::EnvSetPgfaultUpcall { env, entry }).map(drop)
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PageFlags) -> Result<(), SysError> {
        self.call(Syscall::PageAlloc { env, va, perm }).map(drop)
    }

    fn page_map(
        &mut self,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        self.call(Syscall::PageMap { src, src_va, dst, dst_va, perm }).map(drop)
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), SysError> {
        self.call(Syscall::PageUnmap { env, va }).map(drop)
    }

    fn ipc_try_send(
        &mut self,
        to: EnvId,
        value: u32,
        page: Option<VirtAddr>,
        perm: PageFlags,
    ) -> Result<(), SysError> {
        self.call(Syscall::IpcTrySend { to, value, page, perm }).map(drop)
    }

    fn ipc_recv(&mut self, dst: Option<VirtAddr>) -> Result<(), SysError> {
        self.call(Syscall::IpcRecv { dst }).map(drop)
    }
}

impl UserSpace for UserCtx {
    fn uvpd(&self, va: VirtAddr) -> bool {
        self.kernel.uvpd(CPU, va)
    }

    fn uvpt(&self, va: VirtAddr) -> Option<PageFlags> {
        self.kernel.uvpt(CPU, va)
    }

    fn this_env(&self) -> EnvInfo {
        self.kernel.env_info(self.me).expect("running env is live")
    }

    fn env_count(&self) -> usize {
        self.kernel.env_count()
    }

    fn env_at(&self, index: usize) -> Option<EnvInfo> {
        self.kernel.env_at(index)
    }

    fn read_bytes(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), PageFault> {
        self.kernel.user_read(CPU, va, buf)
    }

    fn write_bytes(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), PageFault> {
        self.kernel.user_write(CPU, va, data)
    }
}
