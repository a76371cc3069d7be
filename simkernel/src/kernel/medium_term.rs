//! Medium-term scheduler: suspension of long-blocked processes, swap-out
//! and swap-in.

use super::Kernel;
use crate::config::LongTermAlgorithm;
use crate::types::{Pcb, ProcessState};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Kernel {
    /// One medium-term pass
    pub(crate) async fn run_medium_term(self: &Arc<Self>) {
        self.request_swap_out();
        self.swap_in_ready().await;

        if self.queues.is_empty(ProcessState::SuspendedReady) && !self.queues.is_empty(ProcessState::New) {
            self.bells.long_term.ring();
        }
    }

    /// Suspension timer expiry. Only moves the process if it is still in
    /// the BLOCKED stay the timer was armed for.
    pub(crate) fn suspend_blocked(self: &Arc<Self>, pcb: &Arc<Pcb>, epoch: u64) {
        let moved = self.transition_if(pcb, ProcessState::SuspendedBlocked, |data| {
            data.state == ProcessState::Blocked && data.block_epoch == epoch
        });

        if moved {
            info!(
                "## ({}) Suspended after {}ms blocked",
                pcb.pid(),
                self.config.suspension_time_ms
            );
            self.bells.medium_term.ring();
        }
    }

    /// Start a swap-out for the first SUSPENDED_BLOCKED process that has
    /// none in flight
    fn request_swap_out(self: &Arc<Self>) {
        let candidate = self
            .queues
            .snapshot(ProcessState::SuspendedBlocked)
            .into_iter()
            .find(|pcb| pcb.try_request_swap());

        let Some(pcb) = candidate else {
            return;
        };

        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            let pid = pcb.pid();
            match kernel.memory.swap_out(pid).await {
                Ok(()) => {
                    pcb.finish_swap_out(true);
                    info!("## ({}) Swapped out", pid);
                    kernel.bells.long_term.ring();
                    kernel.bells.medium_term.ring();
                }
                Err(e) => {
                    pcb.finish_swap_out(false);
                    warn!("Swap-out of process {} failed: {}", pid, e);
                    // Unblocked while the request was pending; swap-in can go ahead now
                    if pcb.state() == ProcessState::SuspendedReady {
                        kernel.bells.medium_term.ring();
                    }
                }
            }
        });
    }

    /// Bring SUSPENDED_READY processes back while memory allows
    async fn swap_in_ready(self: &Arc<Self>) {
        while let Some(pcb) = self.swap_in_candidate() {
            let pid = pcb.pid();

            match self.memory.check_capacity(pid, pcb.size()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Not enough memory to swap in process {} (size {})", pid, pcb.size());
                    return;
                }
                Err(e) => {
                    warn!("Capacity check for process {} failed: {}", pid, e);
                    return;
                }
            }

            if let Err(e) = self.memory.swap_in(pid).await {
                error!("Swap-in of process {} failed: {}", pid, e);
                self.terminate(&pcb);
                continue;
            }

            pcb.clear_swap_request();
            if self.transition_from(&pcb, ProcessState::SuspendedReady, ProcessState::Ready) {
                info!("## ({}) Swapped in", pid);
                self.bells.short_term.ring();
            } else {
                // Moved by someone else while the swap-in was in flight
                return;
            }
        }
    }

    /// FIFO takes the oldest entry of SUSPENDED_READY, PMCP the smallest.
    /// Processes whose swap-out has not been answered yet are skipped.
    fn swap_in_candidate(&self) -> Option<Arc<Pcb>> {
        let mut settled = self
            .queues
            .snapshot(ProcessState::SuspendedReady)
            .into_iter()
            .filter(|pcb| !pcb.swap_in_flight());

        match self.config.long_term_algorithm {
            LongTermAlgorithm::Fifo => settled.next(),
            LongTermAlgorithm::Pmcp => settled.min_by_key(|pcb| pcb.size()),
        }
    }
}
