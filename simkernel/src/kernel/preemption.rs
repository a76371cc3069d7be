//! SRT preemption check, run whenever a process enters READY under a
//! preemptive algorithm.

use super::Kernel;
use crate::types::{Pcb, ProcessState};

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl Kernel {
    /// Interrupt the EXECUTING process with the most estimated time left if
    /// `arrival` would finish sooner. Nothing happens while a CPU is free;
    /// the dispatcher will place the arrival there instead.
    pub(crate) async fn check_preemption(self: &Arc<Self>, arrival: &Arc<Pcb>) {
        if self.cpus.has_free() {
            return;
        }
        if arrival.state() != ProcessState::Ready {
            return;
        }

        let arrival_estimate = arrival.estimated_burst();
        let now = Instant::now();

        let victim = self
            .queues
            .snapshot(ProcessState::Executing)
            .into_iter()
            .map(|pcb| {
                let remaining = pcb.lock().remaining_estimate(now);
                (pcb, remaining)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((victim, remaining)) = victim else {
            return;
        };

        if arrival_estimate >= remaining {
            debug!(
                "Process {} ({:.0}ms) does not preempt process {} ({:.0}ms left)",
                arrival.pid(),
                arrival_estimate,
                victim.pid(),
                remaining
            );
            return;
        }

        let Some(cpu) = self.cpus.find_by_pid(victim.pid()) else {
            debug!("Process {} is not bound to a CPU, skipping preemption", victim.pid());
            return;
        };

        info!(
            "## ({}) Preempted by process {} ({:.0}ms left vs {:.0}ms)",
            victim.pid(),
            arrival.pid(),
            remaining,
            arrival_estimate
        );

        if let Err(e) = self.cpu_service.interrupt(&cpu, victim.pid()).await {
            warn!("Interrupt of process {} on CPU {} failed: {}", victim.pid(), cpu, e);
        }
    }
}
