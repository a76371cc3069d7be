//! Simulated CPU
//!
//! Runs a loaded program one instruction at a time with a fixed delay per
//! instruction. Interrupts are honoured between instructions.

use super::memory::SimMemory;
use super::program::Instruction;
use crate::resources::CpuEndpoint;
use crate::services::{CpuService, ServiceResult};
use crate::types::{ExecutionReport, IoRequest, Pid, StopReason, Syscall};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// In-process CPU pool. One instance serves every simulated CPU id.
#[derive(Debug)]
pub struct SimCpu {
    memory: Arc<SimMemory>,
    instruction_delay: Duration,
    /// (cpu id, pid) pairs with a pending interrupt
    interrupts: Mutex<HashSet<(String, Pid)>>,
}

impl SimCpu {
    pub fn new(memory: Arc<SimMemory>, instruction_delay: Duration) -> Self {
        Self {
            memory,
            instruction_delay,
            interrupts: Mutex::new(HashSet::new()),
        }
    }

    fn take_interrupt(&self, cpu: &CpuEndpoint, pid: Pid) -> bool {
        self.interrupts.lock().remove(&(cpu.id.clone(), pid))
    }
}

#[async_trait]
impl CpuService for SimCpu {
    async fn execute(&self, cpu: &CpuEndpoint, pid: Pid, program_counter: u64) -> ServiceResult<ExecutionReport> {
        let started = Instant::now();
        let mut pc = program_counter;
        // Interrupts left over from an earlier burst do not apply
        self.take_interrupt(cpu, pid);

        let (reason, syscall) = loop {
            if self.take_interrupt(cpu, pid) {
                debug!("CPU {} interrupted process {} at pc {}", cpu.id, pid, pc);
                break (StopReason::Interrupt, None);
            }

            let Some(instruction) = self.memory.fetch(pid, pc)? else {
                // Ran off the end of the program
                break (StopReason::Finish, None);
            };

            tokio::time::sleep(self.instruction_delay).await;
            pc += 1;

            match instruction {
                Instruction::Noop => continue,
                Instruction::Exit => break (StopReason::Finish, None),
                Instruction::Io { device, duration_ms } => {
                    break (StopReason::Syscall, Some(Syscall::Io(IoRequest { device, duration_ms })))
                }
                Instruction::InitProc { path, size } => {
                    break (StopReason::Syscall, Some(Syscall::InitProc { path, size }))
                }
                Instruction::DumpMemory => break (StopReason::Syscall, Some(Syscall::DumpMemory)),
            }
        };

        Ok(ExecutionReport {
            pid,
            program_counter: pc,
            elapsed_ms: started.elapsed().as_millis() as u64,
            reason,
            syscall,
        })
    }

    async fn interrupt(&self, cpu: &CpuEndpoint, pid: Pid) -> ServiceResult<()> {
        self.interrupts.lock().insert((cpu.id.clone(), pid));
        Ok(())
    }
}
