//! Test doubles for the collaborator services and helpers for driving the
//! kernel step by step.

use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::resources::{CpuEndpoint, DeviceEndpoint};
use crate::services::{CpuService, IoService, MemoryService, ServiceError, ServiceResult};
use crate::types::{ExecutionReport, Pcb, Pid, ProcessState, StopReason};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

// ========== Memory ==========

#[derive(Debug, Default)]
struct MemoryLog {
    sizes: HashMap<Pid, u64>,
    resident: HashMap<Pid, u64>,
    loads: Vec<Pid>,
    swapped_out: Vec<Pid>,
    swapped_in: Vec<Pid>,
    released: Vec<Pid>,
    dumps: Vec<Pid>,
}

/// Memory with an optional capacity that records every call
#[derive(Debug, Default)]
pub(crate) struct MockMemory {
    capacity: Option<u64>,
    log: Mutex<MemoryLog>,
    fail_release: AtomicBool,
    fail_swaps: AtomicBool,
    hold_swap_outs: AtomicBool,
    swap_out_gate: Notify,
}

impl MockMemory {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn fail_swaps(&self, fail: bool) {
        self.fail_swaps.store(fail, Ordering::SeqCst);
    }

    /// Make every swap-out wait for [`MockMemory::release_swap_out`]
    pub fn hold_swap_outs(&self) {
        self.hold_swap_outs.store(true, Ordering::SeqCst);
    }

    /// Let one held swap-out return
    pub async fn release_swap_out(&self) {
        self.swap_out_gate.notify_one();
        settle().await;
    }

    pub fn loads(&self) -> Vec<Pid> {
        self.log.lock().loads.clone()
    }

    pub fn swapped_out(&self) -> Vec<Pid> {
        self.log.lock().swapped_out.clone()
    }

    pub fn swapped_in(&self) -> Vec<Pid> {
        self.log.lock().swapped_in.clone()
    }

    pub fn released(&self) -> Vec<Pid> {
        self.log.lock().released.clone()
    }

    pub fn dumps(&self) -> Vec<Pid> {
        self.log.lock().dumps.clone()
    }
}

#[async_trait]
impl MemoryService for MockMemory {
    async fn check_capacity(&self, pid: Pid, size: u64) -> ServiceResult<bool> {
        let mut log = self.log.lock();
        log.sizes.insert(pid, size);
        let used: u64 = log
            .resident
            .iter()
            .filter(|(owner, _)| **owner != pid)
            .map(|(_, size)| size)
            .sum();
        Ok(self.capacity.map_or(true, |capacity| used + size <= capacity))
    }

    async fn load_process(&self, pid: Pid, size: u64, _path: &str) -> ServiceResult<()> {
        let mut log = self.log.lock();
        log.resident.insert(pid, size);
        log.loads.push(pid);
        Ok(())
    }

    async fn swap_out(&self, pid: Pid) -> ServiceResult<()> {
        if self.hold_swap_outs.load(Ordering::SeqCst) {
            self.swap_out_gate.notified().await;
        }
        if self.fail_swaps.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("swap disabled".into()));
        }
        let mut log = self.log.lock();
        log.resident.remove(&pid);
        log.swapped_out.push(pid);
        Ok(())
    }

    async fn swap_in(&self, pid: Pid) -> ServiceResult<()> {
        if self.fail_swaps.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("swap disabled".into()));
        }
        let mut log = self.log.lock();
        let size = log.sizes.get(&pid).copied().unwrap_or(0);
        log.resident.insert(pid, size);
        log.swapped_in.push(pid);
        Ok(())
    }

    async fn release_process(&self, pid: Pid) -> ServiceResult<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable("memory offline".into()));
        }
        let mut log = self.log.lock();
        log.resident.remove(&pid);
        log.released.push(pid);
        Ok(())
    }

    async fn dump_memory(&self, pid: Pid) -> ServiceResult<()> {
        self.log.lock().dumps.push(pid);
        Ok(())
    }
}

// ========== CPU ==========

/// CPU that replays scripted reports per process and finishes by default
#[derive(Debug)]
pub(crate) struct ScriptedCpu {
    scripts: Mutex<HashMap<Pid, VecDeque<ExecutionReport>>>,
    executions: Mutex<Vec<(String, Pid)>>,
    interrupts: Mutex<Vec<(String, Pid)>>,
    held: AtomicBool,
    gate: Semaphore,
    fail: AtomicBool,
    fail_interrupts: AtomicBool,
}

impl Default for ScriptedCpu {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            executions: Mutex::new(Vec::new()),
            interrupts: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fail: AtomicBool::new(false),
            fail_interrupts: AtomicBool::new(false),
        }
    }
}

impl ScriptedCpu {
    /// Reports returned by successive executions of `pid`
    pub fn script(&self, pid: Pid, reports: Vec<ExecutionReport>) {
        self.scripts.lock().insert(pid, reports.into());
    }

    /// Make every execution wait for [`ScriptedCpu::release_one`]
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let one held execution return
    pub async fn release_one(&self) {
        self.gate.add_permits(1);
        settle().await;
    }

    pub fn fail_executions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Record interrupts but report them as undeliverable
    pub fn fail_interrupts(&self, fail: bool) {
        self.fail_interrupts.store(fail, Ordering::SeqCst);
    }

    pub fn executions(&self) -> Vec<(String, Pid)> {
        self.executions.lock().clone()
    }

    pub fn interrupts(&self) -> Vec<(String, Pid)> {
        self.interrupts.lock().clone()
    }
}

#[async_trait]
impl CpuService for ScriptedCpu {
    async fn execute(&self, cpu: &CpuEndpoint, pid: Pid, program_counter: u64) -> ServiceResult<ExecutionReport> {
        self.executions.lock().push((cpu.id.clone(), pid));

        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable(cpu.address.clone()));
        }

        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|_| ServiceError::Unreachable(cpu.address.clone()))?
                .forget();
        }

        let next = self.scripts.lock().get_mut(&pid).and_then(|script| script.pop_front());
        Ok(next.unwrap_or_else(|| ExecutionReport::new(pid, program_counter, StopReason::Finish)))
    }

    async fn interrupt(&self, cpu: &CpuEndpoint, pid: Pid) -> ServiceResult<()> {
        self.interrupts.lock().push((cpu.id.clone(), pid));
        if self.fail_interrupts.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable(cpu.address.clone()));
        }
        Ok(())
    }
}

// ========== I/O ==========

/// One recorded I/O request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IoCall {
    pub pid: Pid,
    pub address: String,
    pub duration_ms: u64,
}

/// I/O service that forwards every request to the test
#[derive(Debug)]
pub(crate) struct MockIo {
    calls: mpsc::UnboundedSender<IoCall>,
    fail: AtomicBool,
}

impl MockIo {
    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IoService for MockIo {
    async fn sleep(&self, device: &DeviceEndpoint, pid: Pid, duration_ms: u64) -> ServiceResult<()> {
        let _ = self.calls.send(IoCall {
            pid,
            address: device.address.clone(),
            duration_ms,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable(device.address.clone()));
        }
        Ok(())
    }
}

// ========== Harness ==========

/// A kernel wired to mock collaborators. Workers are not started, so tests
/// drive each scheduler pass by hand.
pub(crate) struct TestHarness {
    pub kernel: Arc<Kernel>,
    pub memory: Arc<MockMemory>,
    pub cpu: Arc<ScriptedCpu>,
    pub io: Arc<MockIo>,
    pub io_calls: mpsc::UnboundedReceiver<IoCall>,
}

pub(crate) fn harness(config: KernelConfig) -> TestHarness {
    build(config, MockMemory::default())
}

pub(crate) fn harness_with_capacity(config: KernelConfig, capacity: u64) -> TestHarness {
    build(config, MockMemory::with_capacity(capacity))
}

fn build(config: KernelConfig, memory: MockMemory) -> TestHarness {
    let memory = Arc::new(memory);
    let cpu = Arc::new(ScriptedCpu::default());
    let (tx, io_calls) = mpsc::unbounded_channel();
    let io = Arc::new(MockIo {
        calls: tx,
        fail: AtomicBool::new(false),
    });

    let kernel = Kernel::new(config, memory.clone(), cpu.clone(), io.clone()).unwrap();

    TestHarness {
        kernel,
        memory,
        cpu,
        io,
        io_calls,
    }
}

/// A process in NEW that no scheduler has been told about
pub(crate) fn new_process(kernel: &Arc<Kernel>, size: u64) -> Arc<Pcb> {
    kernel.create_process("programs/test", size, None)
}

/// Let spawned tasks run to their next await point
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Wait until `pcb` reaches `state`, failing the test after a while
pub(crate) async fn wait_for_state(pcb: &Arc<Pcb>, state: ProcessState) {
    settle().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while pcb.state() != state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("process {} never reached {} (in {})", pcb.pid(), state, pcb.state()));
}
