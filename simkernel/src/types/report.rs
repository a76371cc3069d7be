//! CPU Execution Reports
//!
//! What a CPU returns when it stops executing a process: why it stopped,
//! where the program counter ended up and, for syscalls, the request payload.

use super::process::Pid;
use serde::{Deserialize, Serialize};

/// Why the CPU stopped executing a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// Program reached EXIT
    Finish,
    /// CPU asks the kernel to pick the next process
    Replan,
    /// Kernel interrupt was honoured
    Interrupt,
    /// Program issued a syscall
    Syscall,
    /// Anything the kernel does not recognise
    #[serde(other)]
    Unknown,
}

/// I/O request parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoRequest {
    /// Device pool name
    pub device: String,
    /// Requested sleep time
    pub duration_ms: u64,
}

/// Syscall issued by a running program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Syscall {
    /// Block on a device
    Io(IoRequest),
    /// Create a child process
    InitProc { path: String, size: u64 },
    /// Ask memory for a dump of the caller
    DumpMemory,
    /// Unrecognised syscall type
    #[serde(other)]
    Unknown,
}

impl Syscall {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Io(_) => "IO",
            Syscall::InitProc { .. } => "INIT_PROC",
            Syscall::DumpMemory => "DUMP_MEMORY",
            Syscall::Unknown => "UNKNOWN",
        }
    }
}

/// Result of one `execute` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub pid: Pid,
    /// Program counter after the burst
    pub program_counter: u64,
    /// CPU-side execution time
    pub elapsed_ms: u64,
    pub reason: StopReason,
    /// Payload when `reason` is `Syscall`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall: Option<Syscall>,
}

impl ExecutionReport {
    pub fn new(pid: Pid, program_counter: u64, reason: StopReason) -> Self {
        Self {
            pid,
            program_counter,
            elapsed_ms: 0,
            reason,
            syscall: None,
        }
    }

    pub fn with_syscall(pid: Pid, program_counter: u64, syscall: Syscall) -> Self {
        Self {
            syscall: Some(syscall),
            ..Self::new(pid, program_counter, StopReason::Syscall)
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}
