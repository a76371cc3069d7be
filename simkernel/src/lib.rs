//! SimKernel: Scheduling Engine for a Simulated Kernel
//!
//! SimKernel schedules simulated processes across simulated CPUs, I/O devices
//! and a simulated memory subsystem. Every collaborator is reached through a
//! request/response interface, never through shared memory.
//!
//! ## Core Features
//! - Seven-state process lifecycle with per-state metrics
//! - Long-term admission (FIFO, smallest-size-first)
//! - Short-term dispatch (FIFO, SJF, SRT) with exponential burst estimation
//! - Medium-term suspension with cancellable timers and swap in/out
//! - Device pools with per-name wait lists
//!
//! ## Modules
//! - `types` - Process control block, lifecycle states, CPU reports
//! - `queues` - One ordered queue per lifecycle state
//! - `resources` - CPU and I/O device registries
//! - `doorbell` - Coalescing wake-up signals for the scheduler workers
//! - `services` - Collaborator interfaces (memory, CPU, I/O)
//! - `kernel` - The engine: transitions and the three scheduler tiers
//! - `sim` - In-process collaborators for local runs
//! - `config` - Engine configuration

pub mod config;
pub mod doorbell;
pub mod kernel;
pub mod queues;
pub mod resources;
pub mod services;
pub mod sim;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::{ConfigError, KernelConfig, LongTermAlgorithm, ShortTermAlgorithm};
pub use kernel::{Kernel, KernelEvent};
pub use services::{CpuService, IoService, MemoryService, ServiceError, ServiceResult};
pub use types::*;

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors that can surface from the kernel's public API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Program error: {0}")]
    Program(String),

    #[error("Process of {size} bytes can never fit in {capacity} bytes of memory")]
    TooLarge { size: u64, capacity: u64 },
}
