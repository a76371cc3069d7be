//! CPU Registry
//!
//! Connected execution units with their free/busy status and occupant.

use crate::types::Pid;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How to reach a CPU
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuEndpoint {
    /// CPU identifier
    pub id: String,
    /// Network address
    pub address: String,
}

impl std::fmt::Display for CpuEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Registry entry for one CPU
#[derive(Debug, Clone)]
pub struct CpuRecord {
    pub endpoint: CpuEndpoint,
    pub is_free: bool,
    /// Process currently bound to the CPU
    pub pid_executing: Option<Pid>,
}

/// Thread-safe CPU registry
#[derive(Debug, Default)]
pub struct CpuRegistry {
    cpus: Mutex<Vec<CpuRecord>>,
}

impl CpuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a CPU as free. A reconnecting CPU keeps its status and
    /// only has its address refreshed. Returns true for a new CPU.
    pub fn register(&self, id: &str, address: &str) -> bool {
        let mut cpus = self.cpus.lock();

        if let Some(record) = cpus.iter_mut().find(|c| c.endpoint.id == id) {
            record.endpoint.address = address.to_string();
            debug!("CPU {} reconnected at {}", id, address);
            return false;
        }

        cpus.push(CpuRecord {
            endpoint: CpuEndpoint {
                id: id.to_string(),
                address: address.to_string(),
            },
            is_free: true,
            pid_executing: None,
        });
        info!("CPU {} connected at {} (total: {})", id, address, cpus.len());
        true
    }

    /// Reserve the first free CPU
    pub fn acquire_free(&self) -> Option<CpuEndpoint> {
        let mut cpus = self.cpus.lock();
        let record = cpus.iter_mut().find(|c| c.is_free)?;
        record.is_free = false;
        record.pid_executing = None;
        Some(record.endpoint.clone())
    }

    /// Record the process running on a reserved CPU
    pub fn bind(&self, id: &str, pid: Pid) {
        let mut cpus = self.cpus.lock();
        if let Some(record) = cpus.iter_mut().find(|c| c.endpoint.id == id) {
            record.is_free = false;
            record.pid_executing = Some(pid);
        }
    }

    /// Mark a CPU free. Returns false for an unknown CPU.
    pub fn release(&self, id: &str) -> bool {
        let mut cpus = self.cpus.lock();
        match cpus.iter_mut().find(|c| c.endpoint.id == id) {
            Some(record) => {
                record.is_free = true;
                record.pid_executing = None;
                true
            }
            None => false,
        }
    }

    /// CPU currently running `pid`
    pub fn find_by_pid(&self, pid: Pid) -> Option<CpuEndpoint> {
        self.cpus
            .lock()
            .iter()
            .find(|c| c.pid_executing == Some(pid))
            .map(|c| c.endpoint.clone())
    }

    pub fn has_free(&self) -> bool {
        self.cpus.lock().iter().any(|c| c.is_free)
    }

    pub fn snapshot(&self) -> Vec<CpuRecord> {
        self.cpus.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.cpus.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.lock().is_empty()
    }
}
