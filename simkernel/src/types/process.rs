//! Process Control Block
//!
//! The unit of scheduling state. Immutable identity (pid, parent, size,
//! program path) lives on the block itself; everything that changes while
//! the process moves through the kernel sits behind the block's own mutex.

use super::report::IoRequest;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Process identifier, assigned monotonically and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Raw numeric value
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// Created, waiting for memory admission
    New,
    /// Loaded, waiting for a CPU
    Ready,
    /// Running on a CPU
    Executing,
    /// Waiting on I/O or a blocking syscall
    Blocked,
    /// Swapped out, ready to run once swapped back in
    SuspendedReady,
    /// Swapped out while still blocked
    SuspendedBlocked,
    /// Finished, waiting for memory release
    Exit,
}

impl ProcessState {
    /// Every state, in queue order
    pub const ALL: [ProcessState; 7] = [
        ProcessState::New,
        ProcessState::Ready,
        ProcessState::Executing,
        ProcessState::Blocked,
        ProcessState::SuspendedReady,
        ProcessState::SuspendedBlocked,
        ProcessState::Exit,
    ];

    /// Position of this state in [`ProcessState::ALL`]
    pub fn index(self) -> usize {
        match self {
            ProcessState::New => 0,
            ProcessState::Ready => 1,
            ProcessState::Executing => 2,
            ProcessState::Blocked => 3,
            ProcessState::SuspendedReady => 4,
            ProcessState::SuspendedBlocked => 5,
            ProcessState::Exit => 6,
        }
    }

    /// Whether the process is swapped out of memory
    pub fn is_suspended(self) -> bool {
        matches!(self, ProcessState::SuspendedReady | ProcessState::SuspendedBlocked)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Executing => "EXEC",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::SuspendedReady => "SUSP. READY",
            ProcessState::SuspendedBlocked => "SUSP. BLOCKED",
            ProcessState::Exit => "EXIT",
        };
        write!(f, "{}", name)
    }
}

/// Armed suspension timer for one stay in BLOCKED
#[derive(Debug)]
pub(crate) struct SuspensionTimer {
    handle: JoinHandle<()>,
}

impl SuspensionTimer {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Mutable part of a process control block
#[derive(Debug)]
pub(crate) struct PcbData {
    /// Current lifecycle state
    pub state: ProcessState,
    /// Next instruction index
    pub program_counter: u64,
    /// Time of the last state change
    pub last_transition: Instant,
    /// Times each state was entered
    pub counts: [u32; 7],
    /// Time spent in each state
    pub durations: [Duration; 7],
    /// Estimated next burst (ms)
    pub estimated_burst: f64,
    /// Last measured burst (ms)
    pub real_burst: f64,
    /// Dispatch time of the current burst
    pub burst_start: Option<Instant>,
    /// CPU time reported by the CPUs
    pub cpu_time: Duration,
    /// A swap-out has been requested for the current suspension
    pub swap_requested: bool,
    /// The memory service has not answered the swap-out yet
    pub swap_in_flight: bool,
    /// I/O request waiting for a busy device
    pub pending_io: Option<IoRequest>,
    /// Timer moving the process to SUSPENDED_BLOCKED
    pub suspension: Option<SuspensionTimer>,
    /// Bumped on every entry into BLOCKED
    pub block_epoch: u64,
}

impl PcbData {
    /// No state has been entered yet
    pub fn is_fresh(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Move to `to`, accruing time spent in the current state. Entering
    /// EXECUTING stamps the burst start. Returns the previous state.
    pub fn enter(&mut self, to: ProcessState, now: Instant) -> ProcessState {
        let from = self.state;
        if !self.is_fresh() {
            let spent = now.saturating_duration_since(self.last_transition);
            self.durations[from.index()] += spent;
        }
        self.counts[to.index()] += 1;
        self.state = to;
        self.last_transition = now;
        match to {
            ProcessState::Blocked => self.block_epoch += 1,
            ProcessState::Executing => self.burst_start = Some(now),
            _ => {}
        }
        from
    }

    /// Milliseconds left of the estimated burst for a running process
    pub fn remaining_estimate(&self, now: Instant) -> f64 {
        match self.burst_start {
            Some(start) => {
                let elapsed = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
                (self.estimated_burst - elapsed).max(0.0)
            }
            None => self.estimated_burst,
        }
    }
}

/// Process control block
#[derive(Debug)]
pub struct Pcb {
    pid: Pid,
    parent: Option<Pid>,
    size: u64,
    path: String,
    data: Mutex<PcbData>,
}

impl Pcb {
    /// Create a block that has not entered any state yet
    pub fn new(pid: Pid, parent: Option<Pid>, size: u64, path: impl Into<String>, initial_estimate: f64) -> Self {
        Self {
            pid,
            parent,
            size,
            path: path.into(),
            data: Mutex::new(PcbData {
                state: ProcessState::New,
                program_counter: 0,
                last_transition: Instant::now(),
                counts: [0; 7],
                durations: [Duration::ZERO; 7],
                estimated_burst: initial_estimate.max(0.0),
                real_burst: 0.0,
                burst_start: None,
                cpu_time: Duration::ZERO,
                swap_requested: false,
                swap_in_flight: false,
                pending_io: None,
                suspension: None,
                block_epoch: 0,
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PcbData> {
        self.data.lock()
    }

    pub fn state(&self) -> ProcessState {
        self.data.lock().state
    }

    pub fn program_counter(&self) -> u64 {
        self.data.lock().program_counter
    }

    pub fn estimated_burst(&self) -> f64 {
        self.data.lock().estimated_burst
    }

    pub(crate) fn set_estimated_burst(&self, estimate: f64) {
        self.data.lock().estimated_burst = estimate.max(0.0);
    }

    /// Times the process entered `state`
    pub fn state_count(&self, state: ProcessState) -> u32 {
        self.data.lock().counts[state.index()]
    }

    /// Claim the swap-out slot; false if a swap-out was already requested
    pub(crate) fn try_request_swap(&self) -> bool {
        let mut data = self.data.lock();
        if data.swap_requested || data.swap_in_flight {
            return false;
        }
        data.swap_requested = true;
        data.swap_in_flight = true;
        true
    }

    /// The memory service answered the swap-out. A failed request can be
    /// retried on a later pass.
    pub(crate) fn finish_swap_out(&self, succeeded: bool) {
        let mut data = self.data.lock();
        data.swap_in_flight = false;
        if !succeeded {
            data.swap_requested = false;
        }
    }

    pub fn swap_in_flight(&self) -> bool {
        self.data.lock().swap_in_flight
    }

    pub(crate) fn clear_swap_request(&self) {
        self.data.lock().swap_requested = false;
    }

    pub fn swap_requested(&self) -> bool {
        self.data.lock().swap_requested
    }

    pub(crate) fn set_pending_io(&self, request: IoRequest) {
        self.data.lock().pending_io = Some(request);
    }

    pub(crate) fn take_pending_io(&self) -> Option<IoRequest> {
        self.data.lock().pending_io.take()
    }

    /// Snapshot for the status surface
    pub fn report(&self) -> ProcessReport {
        let data = self.data.lock();
        let now = Instant::now();

        let metrics = ProcessState::ALL
            .iter()
            .map(|&state| {
                let mut duration = data.durations[state.index()];
                if state == data.state && !data.is_fresh() {
                    duration += now.saturating_duration_since(data.last_transition);
                }
                StateMetric {
                    state,
                    count: data.counts[state.index()],
                    duration_ms: duration.as_millis() as u64,
                }
            })
            .collect();

        ProcessReport {
            pid: self.pid,
            parent: self.parent,
            size: self.size,
            path: self.path.clone(),
            state: data.state,
            program_counter: data.program_counter,
            estimated_burst_ms: data.estimated_burst,
            real_burst_ms: data.real_burst,
            cpu_time_ms: data.cpu_time.as_millis() as u64,
            metrics,
        }
    }
}

/// Per-state metric line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetric {
    pub state: ProcessState,
    pub count: u32,
    pub duration_ms: u64,
}

/// Point-in-time view of a process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub size: u64,
    pub path: String,
    pub state: ProcessState,
    pub program_counter: u64,
    pub estimated_burst_ms: f64,
    pub real_burst_ms: f64,
    pub cpu_time_ms: u64,
    pub metrics: Vec<StateMetric>,
}

impl ProcessReport {
    /// Times the process entered `state`
    pub fn count(&self, state: ProcessState) -> u32 {
        self.metrics
            .iter()
            .find(|m| m.state == state)
            .map_or(0, |m| m.count)
    }

    /// Milliseconds spent in `state`
    pub fn duration_ms(&self, state: ProcessState) -> u64 {
        self.metrics
            .iter()
            .find(|m| m.state == state)
            .map_or(0, |m| m.duration_ms)
    }

    /// Metric summary in the kernel log format
    pub fn metrics_line(&self) -> String {
        let parts: Vec<String> = self
            .metrics
            .iter()
            .map(|m| format!("{} {} {}ms", m.state, m.count, m.duration_ms))
            .collect();
        format!("## ({}) - Metrics: {}", self.pid, parts.join(", "))
    }
}
