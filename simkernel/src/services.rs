//! Collaborator Services
//!
//! The kernel reaches memory, CPUs and I/O devices only through these
//! request/response interfaces. Implementations may be remote clients or the
//! in-process simulation in [`crate::sim`].

use crate::resources::{CpuEndpoint, DeviceEndpoint};
use crate::types::{ExecutionReport, Pid};
use async_trait::async_trait;

/// Result type for collaborator calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Collaborator call failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Memory module
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Whether `size` bytes are available for `pid`
    async fn check_capacity(&self, pid: Pid, size: u64) -> ServiceResult<bool>;

    /// Load the program at `path` for `pid`
    async fn load_process(&self, pid: Pid, size: u64, path: &str) -> ServiceResult<()>;

    /// Move `pid` out to swap
    async fn swap_out(&self, pid: Pid) -> ServiceResult<()>;

    /// Bring `pid` back from swap
    async fn swap_in(&self, pid: Pid) -> ServiceResult<()>;

    /// Free everything held by `pid`
    async fn release_process(&self, pid: Pid) -> ServiceResult<()>;

    /// Dump the memory of `pid`
    async fn dump_memory(&self, pid: Pid) -> ServiceResult<()>;
}

/// CPU execution units
#[async_trait]
pub trait CpuService: Send + Sync {
    /// Run `pid` from `program_counter` until it stops
    async fn execute(&self, cpu: &CpuEndpoint, pid: Pid, program_counter: u64) -> ServiceResult<ExecutionReport>;

    /// Ask the CPU to stop `pid` at the next instruction boundary
    async fn interrupt(&self, cpu: &CpuEndpoint, pid: Pid) -> ServiceResult<()>;
}

/// I/O devices
#[async_trait]
pub trait IoService: Send + Sync {
    /// Start a sleep of `duration_ms` for `pid`. Completion is reported
    /// back to the kernel out of band.
    async fn sleep(&self, device: &DeviceEndpoint, pid: Pid, duration_ms: u64) -> ServiceResult<()>;
}
