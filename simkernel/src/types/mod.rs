//! Core Kernel Types
//!
//! Process control blocks, lifecycle states, CPU execution reports and
//! burst estimation.

pub mod burst;
pub mod process;
pub mod report;

pub use burst::BurstEstimator;
pub use process::{Pcb, Pid, ProcessReport, ProcessState, StateMetric};
pub use report::{ExecutionReport, IoRequest, StopReason, Syscall};
