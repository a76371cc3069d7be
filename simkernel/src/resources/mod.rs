//! Execution Resources
//!
//! Registries of connected CPUs and I/O devices. Each registry guards only
//! its own free/busy bookkeeping; no registry lock is held across a call to
//! a collaborator.

pub mod cpu;
pub mod device;

pub use cpu::{CpuEndpoint, CpuRecord, CpuRegistry};
pub use device::{Claim, DeviceEndpoint, DeviceRecord, DeviceRegistry, Release};
