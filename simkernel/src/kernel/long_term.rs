//! Long-term scheduler: process finalization and admission into memory.

use super::{Kernel, KernelEvent};
use crate::config::LongTermAlgorithm;
use crate::types::{Pcb, ProcessState};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Kernel {
    /// One long-term pass. EXIT is drained first; admission only runs while
    /// nothing waits in SUSPENDED_READY, which has priority for memory.
    pub(crate) async fn run_long_term(self: &Arc<Self>) {
        loop {
            self.finalize_exited().await;

            if !self.queues.is_empty(ProcessState::SuspendedReady) {
                debug!("Suspended processes waiting for memory, deferring admission");
                self.bells.medium_term.ring();
                break;
            }

            let admitted = match self.config.long_term_algorithm {
                LongTermAlgorithm::Fifo => self.admit_head().await,
                LongTermAlgorithm::Pmcp => self.admit_smallest_first().await,
            };
            if !admitted {
                break;
            }
        }
    }

    /// Release every process in EXIT. Stops at the first release failure so
    /// the process stays in EXIT for the next pass.
    async fn finalize_exited(self: &Arc<Self>) {
        while let Some(pcb) = self.queues.front(ProcessState::Exit) {
            if !self.finalize(&pcb).await {
                break;
            }
        }
    }

    async fn finalize(self: &Arc<Self>, pcb: &Arc<Pcb>) -> bool {
        let pid = pcb.pid();

        if let Err(e) = self.memory.release_process(pid).await {
            error!("Failed to release memory of process {}: {}", pid, e);
            return false;
        }

        if let Some(timer) = pcb.lock().suspension.take() {
            timer.cancel();
        }
        self.queues.remove(ProcessState::Exit, pid);

        let report = pcb.report();
        info!("## ({}) Process finished - State: {}", pid, ProcessState::Exit);
        info!("{}", report.metrics_line());

        self.finished.lock().insert(pid, report.clone());
        let _ = self.event_tx.send(KernelEvent::ProcessFinished(report));
        true
    }

    /// FIFO: only the head of NEW may be admitted
    async fn admit_head(self: &Arc<Self>) -> bool {
        match self.queues.front(ProcessState::New) {
            Some(pcb) => self.try_admit(&pcb).await,
            None => false,
        }
    }

    /// PMCP: try every NEW process, smallest first
    async fn admit_smallest_first(self: &Arc<Self>) -> bool {
        let mut candidates = self.queues.snapshot(ProcessState::New);
        candidates.sort_by_key(|p| p.size());

        let mut admitted = false;
        for pcb in candidates {
            if self.try_admit(&pcb).await {
                admitted = true;
            }
        }
        admitted
    }

    async fn try_admit(self: &Arc<Self>, pcb: &Arc<Pcb>) -> bool {
        let pid = pcb.pid();
        if !self.queues.contains(ProcessState::New, pid) {
            return false;
        }

        match self.memory.check_capacity(pid, pcb.size()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Not enough memory for process {} (size {})", pid, pcb.size());
                return false;
            }
            Err(e) => {
                warn!("Capacity check for process {} failed: {}", pid, e);
                return false;
            }
        }

        if let Err(e) = self.memory.load_process(pid, pcb.size(), pcb.path()).await {
            warn!("Failed to load process {} from {}: {}", pid, pcb.path(), e);
            return false;
        }

        if !self.transition_from(pcb, ProcessState::New, ProcessState::Ready) {
            return false;
        }
        self.bells.short_term.ring();
        true
    }
}
