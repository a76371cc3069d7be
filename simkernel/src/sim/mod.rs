//! In-Process Simulation
//!
//! Memory, CPUs and I/O devices that live inside the host process, plus a
//! [`Simulation`] that wires them to a kernel for local runs.

pub mod cpu;
pub mod io;
pub mod memory;
pub mod program;

pub use cpu::SimCpu;
pub use io::{IoCompletion, SimIo};
pub use memory::SimMemory;
pub use program::{parse_program, Instruction};

use crate::config::KernelConfig;
use crate::kernel::{Kernel, KernelEvent};
use crate::types::{Pid, ProcessReport};
use crate::{KernelError, KernelResult};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shape of the simulated machine
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Memory capacity in bytes
    pub memory_size: u64,
    /// Number of CPUs
    pub cpus: usize,
    /// One device per entry; repeated names form a pool
    pub devices: Vec<String>,
    /// Time per executed instruction
    pub instruction_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            memory_size: 4_096,
            cpus: 1,
            devices: vec!["DISK".into()],
            instruction_delay: Duration::from_millis(50),
        }
    }
}

/// A running kernel with simulated collaborators
pub struct Simulation {
    kernel: Arc<Kernel>,
    memory: Arc<SimMemory>,
    pump: JoinHandle<()>,
}

impl Simulation {
    /// Build the machine, start the kernel and connect every CPU and device
    pub fn start(config: KernelConfig, machine: SimulationConfig) -> KernelResult<Self> {
        let memory = Arc::new(SimMemory::new(machine.memory_size));
        let cpu = Arc::new(SimCpu::new(Arc::clone(&memory), machine.instruction_delay));
        let (io, mut completions) = SimIo::new();

        let kernel = Kernel::new(config, memory.clone(), cpu, Arc::new(io))?;
        kernel.start();

        for n in 1..=machine.cpus {
            kernel.cpu_connected(&format!("cpu-{}", n), &format!("sim://cpu/{}", n));
        }
        for (n, name) in machine.devices.iter().enumerate() {
            kernel.io_connected(name, &format!("sim://io/{}/{}", name, n));
        }

        let pump_kernel = Arc::clone(&kernel);
        let pump = tokio::spawn(async move {
            while let Some(done) = completions.recv().await {
                pump_kernel.io_finished(done.pid, &done.address);
            }
        });

        info!(
            "Simulation started: {} CPUs, {} devices, {} bytes of memory",
            machine.cpus,
            machine.devices.len(),
            machine.memory_size
        );

        Ok(Self { kernel, memory, pump })
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn memory(&self) -> &Arc<SimMemory> {
        &self.memory
    }

    /// Submit a program for admission. A process larger than the whole
    /// memory would wait in NEW forever and is refused.
    pub fn submit(&self, path: &str, size: u64) -> KernelResult<Pid> {
        let capacity = self.memory.capacity();
        if size > capacity {
            return Err(KernelError::TooLarge { size, capacity });
        }
        Ok(self.kernel.admit_new_process(path, size, None))
    }

    /// Submit the initial program and wait until every process, children
    /// included, has been released
    pub async fn run(&self, path: &str, size: u64) -> KernelResult<Vec<ProcessReport>> {
        let mut events = self.kernel.subscribe();
        self.submit(path, size)?;

        while self.kernel.live_processes() > 0 {
            match events.recv().await {
                Ok(KernelEvent::ProcessFinished(report)) => {
                    info!("Process {} finished ({} left)", report.pid, self.kernel.live_processes());
                }
                Ok(KernelEvent::ProcessCreated { pid, parent: Some(parent) }) => {
                    let capacity = self.memory.capacity();
                    match self.kernel.process_status(pid) {
                        Some(child) if child.size > capacity => warn!(
                            "Process {} (child of {}) needs {} bytes but memory holds {}; it will never be admitted",
                            pid, parent, child.size, capacity
                        ),
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} kernel events", missed),
                Err(RecvError::Closed) => break,
            }
        }

        Ok(self.kernel.finished())
    }

    /// Stop the kernel workers and the completion pump
    pub fn shutdown(&self) {
        self.kernel.stop();
        self.pump.abort();
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("kernel", &self.kernel)
            .field("memory_used", &self.memory.used())
            .finish()
    }
}
