//! Simulated I/O Devices
//!
//! Every request sleeps in the background and reports its completion on a
//! channel. The host forwards completions to [`crate::Kernel::io_finished`].

use crate::resources::DeviceEndpoint;
use crate::services::{IoService, ServiceError, ServiceResult};
use crate::types::Pid;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// A finished I/O request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoCompletion {
    pub pid: Pid,
    /// Address of the device that served the request
    pub address: String,
}

/// In-process I/O device pool
#[derive(Debug, Clone)]
pub struct SimIo {
    completions: mpsc::UnboundedSender<IoCompletion>,
}

impl SimIo {
    /// Create the device pool and the receiving end of its completions
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IoCompletion>) {
        let (completions, rx) = mpsc::unbounded_channel();
        (Self { completions }, rx)
    }
}

#[async_trait]
impl IoService for SimIo {
    async fn sleep(&self, device: &DeviceEndpoint, pid: Pid, duration_ms: u64) -> ServiceResult<()> {
        if self.completions.is_closed() {
            return Err(ServiceError::Unreachable(device.address.clone()));
        }

        let completions = self.completions.clone();
        let address = device.address.clone();
        debug!("Device {} sleeping {}ms for process {}", device, duration_ms, pid);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            let _ = completions.send(IoCompletion { pid, address });
        });
        Ok(())
    }
}
