//! Syscall handling and I/O device hand-off.

use super::Kernel;
use crate::resources::{Claim, DeviceEndpoint, Release};
use crate::types::{IoRequest, Pcb, Pid, ProcessState, Syscall};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Kernel {
    /// Dispatch a syscall reported by a CPU for a process that just left
    /// EXECUTING
    pub(crate) fn handle_syscall(self: &Arc<Self>, pcb: &Arc<Pcb>, syscall: Syscall) {
        let pid = pcb.pid();
        info!("## ({}) Syscall requested: {}", pid, syscall.name());

        match syscall {
            Syscall::Io(request) => self.request_io(pcb, request),
            Syscall::InitProc { path, size } => {
                let child = self.admit_new_process(&path, size, Some(pid));
                debug!("Process {} created child {} from {}", pid, child, path);
                self.transition_from(pcb, ProcessState::Executing, ProcessState::Ready);
            }
            Syscall::DumpMemory => self.dump_memory(pcb),
            Syscall::Unknown => {
                error!("Process {} issued an unknown syscall", pid);
                self.terminate(pcb);
            }
        }
    }

    /// Block the caller and start its I/O, or queue it behind a busy pool
    fn request_io(self: &Arc<Self>, pcb: &Arc<Pcb>, request: IoRequest) {
        let pid = pcb.pid();
        if !self.transition_from(pcb, ProcessState::Executing, ProcessState::Blocked) {
            return;
        }
        info!("## ({}) Blocked by IO: {}", pid, request.device);

        pcb.set_pending_io(request.clone());
        match self.devices.claim_or_wait(&request.device, pcb) {
            Claim::UnknownDevice => {
                pcb.take_pending_io();
                error!("Process {} requested unknown device {}", pid, request.device);
                self.terminate(pcb);
            }
            Claim::Queued => {
                debug!("Process {} waiting for a {} device", pid, request.device);
            }
            Claim::Granted(device) => {
                pcb.take_pending_io();
                self.start_io(device, Arc::clone(pcb), request);
            }
        }
    }

    /// Send the I/O request to its device. Completion arrives later through
    /// [`Kernel::io_finished`].
    fn start_io(self: &Arc<Self>, device: DeviceEndpoint, pcb: Arc<Pcb>, request: IoRequest) {
        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            let pid = pcb.pid();
            debug!("Process {} starting {}ms of I/O on {}", pid, request.duration_ms, device);

            if let Err(e) = kernel.io_service.sleep(&device, pid, request.duration_ms).await {
                error!("I/O request of process {} to {} failed: {}", pid, device, e);
                let release = kernel.devices.release(&device.address);
                kernel.terminate(&pcb);
                kernel.hand_off(release);
            }
        });
    }

    /// Start the pending request of the process a freed device was handed to
    pub(crate) fn hand_off(self: &Arc<Self>, mut release: Release) {
        loop {
            let (device, next) = match release {
                Release::Handoff(device, next) => (device, next),
                Release::Free | Release::UnknownDevice => return,
            };

            match next.take_pending_io() {
                Some(request) => {
                    self.start_io(device, next, request);
                    return;
                }
                None => {
                    warn!("Process {} waited on {} without a pending request", next.pid(), device);
                    release = self.devices.release(&device.address);
                }
            }
        }
    }

    /// Block the caller while memory writes its dump
    fn dump_memory(self: &Arc<Self>, pcb: &Arc<Pcb>) {
        if !self.transition_from(pcb, ProcessState::Executing, ProcessState::Blocked) {
            return;
        }

        let kernel = Arc::clone(self);
        let pcb = Arc::clone(pcb);
        tokio::spawn(async move {
            let pid = pcb.pid();
            match kernel.memory.dump_memory(pid).await {
                Ok(()) => kernel.unblock(pid),
                Err(e) => {
                    error!("Memory dump of process {} failed: {}", pid, e);
                    kernel.terminate(&pcb);
                }
            }
        });
    }

    /// A blocking operation of `pid` completed. A swapped-out process moves
    /// to SUSPENDED_READY instead of READY.
    pub(crate) fn unblock(self: &Arc<Self>, pid: Pid) {
        if let Some(pcb) = self.queues.find(ProcessState::Blocked, pid) {
            if self.transition_from(&pcb, ProcessState::Blocked, ProcessState::Ready) {
                self.bells.short_term.ring();
                return;
            }
        }

        if let Some(pcb) = self.queues.find(ProcessState::SuspendedBlocked, pid) {
            pcb.clear_swap_request();
            if self.transition_from(&pcb, ProcessState::SuspendedBlocked, ProcessState::SuspendedReady) {
                self.bells.medium_term.ring();
                return;
            }
        }

        warn!("Completion for process {} which is not blocked, ignoring", pid);
    }
}
