//! Kernel Scheduling Engine
//!
//! Ties together:
//! - The state transition function (single point of queue moves and metrics)
//! - Long-term admission, short-term dispatch and medium-term suspension
//! - SRT preemption checks
//! - Syscall handling and I/O device hand-off
//!
//! Each scheduler tier is one background worker sleeping on its doorbell.
//! CPU calls, I/O calls, swap-outs and suspension timers run on short-lived
//! tasks so a slow collaborator never stalls a worker.

mod long_term;
mod medium_term;
mod preemption;
mod short_term;
mod syscalls;

use crate::config::KernelConfig;
use crate::doorbell::Doorbells;
use crate::queues::{Placement, QueueSet};
use crate::resources::{CpuRecord, CpuRegistry, DeviceRecord, DeviceRegistry};
use crate::services::{CpuService, IoService, MemoryService};
use crate::types::process::{PcbData, SuspensionTimer};
use crate::types::{BurstEstimator, Pcb, Pid, ProcessReport, ProcessState};
use crate::KernelResult;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Kernel events broadcast to subscribers
#[derive(Debug, Clone)]
pub enum KernelEvent {
    /// Process entered NEW
    ProcessCreated { pid: Pid, parent: Option<Pid> },
    /// Process changed state
    StateChanged { pid: Pid, from: ProcessState, to: ProcessState },
    /// Process released and dropped
    ProcessFinished(ProcessReport),
    /// CPU registered
    CpuConnected(String),
    /// I/O device registered
    DeviceConnected { name: String, address: String },
}

/// The scheduling engine
pub struct Kernel {
    /// Configuration
    config: KernelConfig,
    /// Burst estimator built from `config.alpha`
    estimator: BurstEstimator,
    /// Process queues
    queues: QueueSet,
    /// Connected CPUs
    cpus: CpuRegistry,
    /// Connected I/O devices
    devices: DeviceRegistry,
    /// Scheduler wake-up signals
    bells: Doorbells,
    /// Memory module
    memory: Arc<dyn MemoryService>,
    /// CPU client
    cpu_service: Arc<dyn CpuService>,
    /// I/O client
    io_service: Arc<dyn IoService>,
    /// Next pid to assign
    next_pid: AtomicU32,
    /// Final reports of released processes
    finished: Mutex<BTreeMap<Pid, ProcessReport>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<KernelEvent>,
    /// Scheduler worker handles
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Kernel {
    /// Create a kernel. Workers are not running until [`Kernel::start`].
    pub fn new(
        config: KernelConfig,
        memory: Arc<dyn MemoryService>,
        cpu_service: Arc<dyn CpuService>,
        io_service: Arc<dyn IoService>,
    ) -> KernelResult<Arc<Self>> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_capacity);

        Ok(Arc::new(Self {
            estimator: BurstEstimator::new(config.alpha),
            config,
            queues: QueueSet::new(),
            cpus: CpuRegistry::new(),
            devices: DeviceRegistry::new(),
            bells: Doorbells::default(),
            memory,
            cpu_service,
            io_service,
            next_pid: AtomicU32::new(1),
            finished: Mutex::new(BTreeMap::new()),
            event_tx,
            workers: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the three scheduler workers
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("Kernel already started");
            return;
        }

        info!(
            "Starting kernel (short-term: {}, long-term: {}, alpha: {}, suspension: {}ms)",
            self.config.short_term_algorithm,
            self.config.long_term_algorithm,
            self.config.alpha,
            self.config.suspension_time_ms,
        );

        let kernel = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            loop {
                kernel.bells.long_term.wait().await;
                kernel.run_long_term().await;
            }
        }));

        let kernel = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            loop {
                kernel.bells.medium_term.wait().await;
                kernel.run_medium_term().await;
            }
        }));

        let kernel = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            loop {
                kernel.bells.short_term.wait().await;
                kernel.run_short_term();
            }
        }));

        // Pick up anything submitted before the workers existed
        self.bells.long_term.ring();
        self.bells.medium_term.ring();
        self.bells.short_term.ring();
    }

    /// Abort the scheduler workers. In-flight CPU and I/O tasks finish on
    /// their own.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            handle.abort();
        }
        info!("Kernel stopped");
    }

    // ========== Inbound surface ==========

    /// Create a process in NEW and wake the long-term scheduler
    pub fn admit_new_process(self: &Arc<Self>, path: &str, size: u64, parent: Option<Pid>) -> Pid {
        let pcb = self.create_process(path, size, parent);
        self.bells.long_term.ring();
        pcb.pid()
    }

    /// Assign a pid and place a fresh process in NEW
    pub(crate) fn create_process(self: &Arc<Self>, path: &str, size: u64, parent: Option<Pid>) -> Arc<Pcb> {
        let pid = Pid(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let pcb = Arc::new(Pcb::new(pid, parent, size, path, self.config.initial_estimate_ms));
        self.transition(&pcb, ProcessState::New);
        pcb
    }

    /// Register a CPU as free and wake the dispatcher
    pub fn cpu_connected(&self, id: &str, address: &str) {
        if self.cpus.register(id, address) {
            let _ = self.event_tx.send(KernelEvent::CpuConnected(id.to_string()));
        }
        self.bells.short_term.ring();
    }

    /// Register an I/O device and hand it to the first waiter of its pool
    pub fn io_connected(self: &Arc<Self>, name: &str, address: &str) {
        let release = self.devices.register(name, address);
        let _ = self.event_tx.send(KernelEvent::DeviceConnected {
            name: name.to_string(),
            address: address.to_string(),
        });
        self.hand_off(release);
    }

    /// I/O completion: free the device, unblock `pid`, drain the wait list
    pub fn io_finished(self: &Arc<Self>, pid: Pid, address: &str) {
        let release = self.devices.release(address);
        if matches!(release, crate::resources::Release::UnknownDevice) {
            warn!("I/O completion for process {} from unknown device {}", pid, address);
        }
        info!("## ({}) I/O finished on {}", pid, address);
        self.unblock(pid);
        self.hand_off(release);
    }

    /// Subscribe to kernel events
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.event_tx.subscribe()
    }

    // ========== Status ==========

    /// Live view of a process, or its final report once released
    pub fn process_status(&self, pid: Pid) -> Option<ProcessReport> {
        self.queues
            .all()
            .into_iter()
            .find(|p| p.pid() == pid)
            .map(|p| p.report())
            .or_else(|| self.finished.lock().get(&pid).cloned())
    }

    /// Every known process, live and released, ordered by pid
    pub fn processes(&self) -> Vec<ProcessReport> {
        let mut reports: BTreeMap<Pid, ProcessReport> = self.finished.lock().clone();
        for pcb in self.queues.all() {
            reports.insert(pcb.pid(), pcb.report());
        }
        reports.into_values().collect()
    }

    /// Final reports of released processes
    pub fn finished(&self) -> Vec<ProcessReport> {
        self.finished.lock().values().cloned().collect()
    }

    /// Processes not yet released
    pub fn live_processes(&self) -> usize {
        self.queues.lengths().iter().sum()
    }

    /// Queue lengths indexed like [`ProcessState::ALL`]
    pub fn queue_lengths(&self) -> [usize; 7] {
        self.queues.lengths()
    }

    pub fn cpus(&self) -> Vec<CpuRecord> {
        self.cpus.snapshot()
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.snapshot()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ========== Transitions ==========

    /// Move a process to `to` from whatever state it is in
    pub(crate) fn transition(self: &Arc<Self>, pcb: &Arc<Pcb>, to: ProcessState) -> bool {
        self.transition_if(pcb, to, |_| true)
    }

    /// Move a process to `to` only if it is still in `from`
    pub(crate) fn transition_from(self: &Arc<Self>, pcb: &Arc<Pcb>, from: ProcessState, to: ProcessState) -> bool {
        self.transition_if(pcb, to, |data| data.state == from)
    }

    /// The transition function. Under the PCB lock: check `guard`, refuse
    /// same-state moves, cancel a pending suspension when leaving BLOCKED,
    /// move the PCB between queues and accrue metrics. Outside the lock:
    /// arm the suspension timer on entering BLOCKED and schedule a
    /// preemption check on entering READY under a preemptive algorithm.
    fn transition_if<F>(self: &Arc<Self>, pcb: &Arc<Pcb>, to: ProcessState, guard: F) -> bool
    where
        F: FnOnce(&PcbData) -> bool,
    {
        let pid = pcb.pid();

        let (from, created, block_epoch) = {
            let mut data = pcb.lock();
            if !guard(&*data) {
                return false;
            }

            let created = data.is_fresh();
            if !created && data.state == to {
                warn!("Process {} is already in {}, transition ignored", pid, to);
                return false;
            }

            if !created && data.state == ProcessState::Blocked {
                if let Some(timer) = data.suspension.take() {
                    timer.cancel();
                }
            }

            let placement = if to == ProcessState::Ready && self.config.short_term_algorithm.orders_by_estimate() {
                Placement::Ordered(data.estimated_burst)
            } else {
                Placement::Back
            };

            if created {
                self.queues.insert(to, Arc::clone(pcb), placement);
            } else if !self.queues.relocate(pcb, data.state, to, placement) {
                warn!("Process {} was not queued while in {}", pid, data.state);
            }

            let from = data.enter(to, Instant::now());
            (from, created, data.block_epoch)
        };

        if created {
            info!("## ({}) Process created - State: {}", pid, to);
            let _ = self.event_tx.send(KernelEvent::ProcessCreated { pid, parent: pcb.parent() });
        } else {
            info!("## ({}) State change: {} -> {}", pid, from, to);
            let _ = self.event_tx.send(KernelEvent::StateChanged { pid, from, to });
        }

        if to == ProcessState::Blocked {
            self.arm_suspension_timer(pcb, block_epoch);
        }

        if to == ProcessState::Ready && self.config.short_term_algorithm.is_preemptive() {
            let kernel = Arc::clone(self);
            let arrival = Arc::clone(pcb);
            tokio::spawn(async move {
                kernel.check_preemption(&arrival).await;
            });
        }

        true
    }

    /// Arm the timer that suspends the process if it is still in the same
    /// stay in BLOCKED when the suspension time runs out
    fn arm_suspension_timer(self: &Arc<Self>, pcb: &Arc<Pcb>, epoch: u64) {
        let kernel = Arc::clone(self);
        let target = Arc::clone(pcb);
        let delay = self.config.suspension_time();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            kernel.suspend_blocked(&target, epoch);
        });

        let mut data = pcb.lock();
        if data.state == ProcessState::Blocked && data.block_epoch == epoch {
            if let Some(previous) = data.suspension.replace(SuspensionTimer::new(handle)) {
                previous.cancel();
            }
        } else {
            handle.abort();
        }
    }

    /// Send a process to EXIT and wake the long-term scheduler
    pub(crate) fn terminate(self: &Arc<Self>, pcb: &Arc<Pcb>) {
        if self.transition(pcb, ProcessState::Exit) {
            self.bells.long_term.ring();
        } else {
            debug!("Process {} already terminating", pcb.pid());
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("short_term", &self.config.short_term_algorithm)
            .field("long_term", &self.config.long_term_algorithm)
            .field("queues", &self.queues)
            .field("cpus", &self.cpus.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LongTermAlgorithm, ShortTermAlgorithm};
    use crate::testkit::{self, TestHarness};

    #[tokio::test]
    async fn test_admit_creates_process_in_new() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let mut events = kernel.subscribe();

        let pid = kernel.admit_new_process("programs/a", 64, None);

        assert_eq!(pid, Pid(1));
        assert_eq!(kernel.queues.locate(pid), vec![ProcessState::New]);
        let report = kernel.process_status(pid).unwrap();
        assert_eq!(report.state, ProcessState::New);
        assert_eq!(report.count(ProcessState::New), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            KernelEvent::ProcessCreated { pid: Pid(1), parent: None }
        ));
    }

    #[tokio::test]
    async fn test_pids_are_monotonic() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let a = kernel.admit_new_process("a", 1, None);
        let b = kernel.admit_new_process("b", 1, Some(a));
        assert!(b > a);
        assert_eq!(kernel.process_status(b).unwrap().parent, Some(a));
    }

    #[tokio::test]
    async fn test_transition_keeps_exactly_one_queue() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let pcb = testkit::new_process(&kernel, 10);

        for to in [
            ProcessState::Ready,
            ProcessState::Executing,
            ProcessState::Blocked,
            ProcessState::SuspendedBlocked,
            ProcessState::SuspendedReady,
            ProcessState::Ready,
            ProcessState::Exit,
        ] {
            assert!(kernel.transition(&pcb, to));
            assert_eq!(kernel.queues.locate(pcb.pid()), vec![to]);
            assert_eq!(pcb.state(), to);
        }

        assert_eq!(pcb.state_count(ProcessState::Ready), 2);
        assert_eq!(pcb.state_count(ProcessState::Blocked), 1);
    }

    #[tokio::test]
    async fn test_same_state_transition_refused() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let pcb = testkit::new_process(&kernel, 10);

        assert!(kernel.transition(&pcb, ProcessState::Ready));
        assert!(!kernel.transition(&pcb, ProcessState::Ready));
        assert_eq!(pcb.state_count(ProcessState::Ready), 1);
        assert_eq!(kernel.queues.len(ProcessState::Ready), 1);
    }

    #[tokio::test]
    async fn test_guarded_transition() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let pcb = testkit::new_process(&kernel, 10);

        assert!(!kernel.transition_from(&pcb, ProcessState::Ready, ProcessState::Executing));
        assert_eq!(pcb.state(), ProcessState::New);
        assert!(kernel.transition_from(&pcb, ProcessState::New, ProcessState::Ready));
    }

    #[tokio::test]
    async fn test_ready_ordered_by_estimate_under_sjf() {
        let config = KernelConfig::with_algorithms(ShortTermAlgorithm::Sjf, LongTermAlgorithm::Fifo);
        let TestHarness { kernel, .. } = testkit::harness(config);

        let slow = testkit::new_process(&kernel, 10);
        slow.set_estimated_burst(900.0);
        let fast = testkit::new_process(&kernel, 10);
        fast.set_estimated_burst(100.0);

        kernel.transition(&slow, ProcessState::Ready);
        kernel.transition(&fast, ProcessState::Ready);

        let order: Vec<Pid> = kernel.queues.snapshot(ProcessState::Ready).iter().map(|p| p.pid()).collect();
        assert_eq!(order, vec![fast.pid(), slow.pid()]);
    }

    #[tokio::test]
    async fn test_processes_lists_live_and_finished() {
        let TestHarness { kernel, .. } = testkit::harness(KernelConfig::default());
        let a = testkit::new_process(&kernel, 10);
        let b = testkit::new_process(&kernel, 10);
        kernel.transition(&a, ProcessState::Exit);
        kernel.run_long_term().await;

        let all = kernel.processes();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pid, a.pid());
        assert_eq!(all[0].state, ProcessState::Exit);
        assert_eq!(all[1].pid, b.pid());
        assert_eq!(kernel.live_processes(), 1);
    }

    async fn wait_finished(events: &mut broadcast::Receiver<KernelEvent>, pid: Pid) -> ProcessReport {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(KernelEvent::ProcessFinished(report)) if report.pid == pid => return report,
                    Ok(_) => {}
                    Err(e) => panic!("event stream failed: {}", e),
                }
            }
        })
        .await
        .expect("process should finish")
    }

    #[tokio::test]
    async fn test_end_to_end_finish() {
        let TestHarness { kernel, memory, cpu, .. } = testkit::harness(KernelConfig::default());
        let mut events = kernel.subscribe();
        kernel.start();
        kernel.cpu_connected("cpu-1", "sim://cpu/1");

        let pid = kernel.admit_new_process("programs/a", 100, None);
        assert_eq!(pid, Pid(1));

        let report = wait_finished(&mut events, pid).await;
        assert_eq!(report.state, ProcessState::Exit);
        assert_eq!(report.count(ProcessState::New), 1);
        assert_eq!(report.count(ProcessState::Ready), 1);
        assert_eq!(report.count(ProcessState::Executing), 1);
        assert_eq!(report.count(ProcessState::Exit), 1);
        assert_eq!(memory.loads(), vec![pid]);
        assert_eq!(memory.released(), vec![pid]);
        assert_eq!(cpu.executions().len(), 1);
        assert_eq!(kernel.live_processes(), 0);

        kernel.stop();
    }

    #[tokio::test]
    async fn test_end_to_end_io_and_child() {
        use crate::types::{ExecutionReport, IoRequest, Syscall};

        let TestHarness { kernel, cpu, mut io_calls, .. } = testkit::harness(KernelConfig::default());
        let mut events = kernel.subscribe();
        kernel.start();
        kernel.cpu_connected("cpu-1", "sim://cpu/1");
        kernel.io_connected("DISK", "disk-1");

        let pump = Arc::clone(&kernel);
        tokio::spawn(async move {
            while let Some(call) = io_calls.recv().await {
                pump.io_finished(call.pid, &call.address);
            }
        });

        cpu.script(
            Pid(1),
            vec![
                ExecutionReport::with_syscall(
                    Pid(1),
                    1,
                    Syscall::InitProc {
                        path: "programs/child".into(),
                        size: 10,
                    },
                ),
                ExecutionReport::with_syscall(
                    Pid(1),
                    2,
                    Syscall::Io(IoRequest {
                        device: "DISK".into(),
                        duration_ms: 5,
                    }),
                ),
            ],
        );
        let parent = kernel.admit_new_process("programs/parent", 20, None);

        let parent_report = wait_finished(&mut events, parent).await;
        assert_eq!(parent_report.program_counter, 2);
        assert_eq!(parent_report.count(ProcessState::Blocked), 1);
        assert_eq!(parent_report.count(ProcessState::Ready), 3);
        assert_eq!(parent_report.count(ProcessState::Executing), 3);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while kernel.finished().len() < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("child should finish");

        let child = kernel.process_status(Pid(2)).unwrap();
        assert_eq!(child.parent, Some(parent));
        assert_eq!(child.state, ProcessState::Exit);

        kernel.stop();
    }
}
