//! Simulated Memory
//!
//! Fixed-capacity memory holding the parsed program of every process. A
//! swapped-out process keeps its program but gives its space back.

use super::program::{parse_program, Instruction};
use crate::services::{MemoryService, ServiceError, ServiceResult};
use crate::types::Pid;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct Frame {
    size: u64,
    program: Arc<Vec<Instruction>>,
    swapped: bool,
}

/// Space used by resident processes other than `pid`
fn resident_except(frames: &HashMap<Pid, Frame>, pid: Pid) -> u64 {
    frames
        .iter()
        .filter(|(owner, f)| **owner != pid && !f.swapped)
        .map(|(_, f)| f.size)
        .sum()
}

/// In-process memory module
#[derive(Debug)]
pub struct SimMemory {
    capacity: u64,
    frames: Mutex<HashMap<Pid, Frame>>,
}

impl SimMemory {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Total capacity
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Space used by resident processes
    pub fn used(&self) -> u64 {
        self.frames
            .lock()
            .values()
            .filter(|f| !f.swapped)
            .map(|f| f.size)
            .sum()
    }

    /// Instruction at `program_counter` for a resident process
    pub fn fetch(&self, pid: Pid, program_counter: u64) -> ServiceResult<Option<Instruction>> {
        let frames = self.frames.lock();
        let frame = frames
            .get(&pid)
            .ok_or_else(|| ServiceError::Rejected(format!("process {} not loaded", pid)))?;
        if frame.swapped {
            return Err(ServiceError::Rejected(format!("process {} is swapped out", pid)));
        }
        Ok(frame.program.get(program_counter as usize).cloned())
    }

    /// Whether `pid` is currently swapped out
    pub fn is_swapped(&self, pid: Pid) -> bool {
        self.frames.lock().get(&pid).map_or(false, |f| f.swapped)
    }

    fn set_swapped(&self, pid: Pid, swapped: bool) -> ServiceResult<()> {
        let mut frames = self.frames.lock();
        let frame = frames
            .get_mut(&pid)
            .ok_or_else(|| ServiceError::Rejected(format!("process {} not loaded", pid)))?;
        frame.swapped = swapped;
        Ok(())
    }
}

#[async_trait]
impl MemoryService for SimMemory {
    async fn check_capacity(&self, pid: Pid, size: u64) -> ServiceResult<bool> {
        Ok(resident_except(&self.frames.lock(), pid) + size <= self.capacity)
    }

    async fn load_process(&self, pid: Pid, size: u64, path: &str) -> ServiceResult<()> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::Rejected(format!("cannot read {}: {}", path, e)))?;
        let program = parse_program(&source).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let mut frames = self.frames.lock();
        let used: u64 = frames.values().filter(|f| !f.swapped).map(|f| f.size).sum();
        if used + size > self.capacity {
            return Err(ServiceError::Rejected(format!("no room for process {} ({} bytes)", pid, size)));
        }

        debug!("Loaded {} instructions for process {} from {}", program.len(), pid, path);
        frames.insert(
            pid,
            Frame {
                size,
                program: Arc::new(program),
                swapped: false,
            },
        );
        Ok(())
    }

    async fn swap_out(&self, pid: Pid) -> ServiceResult<()> {
        self.set_swapped(pid, true)
    }

    async fn swap_in(&self, pid: Pid) -> ServiceResult<()> {
        let mut frames = self.frames.lock();
        let others = resident_except(&frames, pid);
        let frame = frames
            .get_mut(&pid)
            .ok_or_else(|| ServiceError::Rejected(format!("process {} not loaded", pid)))?;
        if !frame.swapped {
            debug!("Process {} is already resident", pid);
            return Ok(());
        }
        if others + frame.size > self.capacity {
            return Err(ServiceError::Rejected(format!("no room to swap in process {}", pid)));
        }
        frame.swapped = false;
        Ok(())
    }

    async fn release_process(&self, pid: Pid) -> ServiceResult<()> {
        self.frames.lock().remove(&pid);
        Ok(())
    }

    async fn dump_memory(&self, pid: Pid) -> ServiceResult<()> {
        let frames = self.frames.lock();
        let frame = frames
            .get(&pid)
            .ok_or_else(|| ServiceError::Rejected(format!("process {} not loaded", pid)))?;
        info!(
            "Memory dump of process {}: {} bytes, {} instructions, swapped: {}",
            pid,
            frame.size,
            frame.program.len(),
            frame.swapped
        );
        Ok(())
    }
}
