//! Short-term scheduler: CPU selection, dispatch and burst completion.

use super::Kernel;
use crate::config::ShortTermAlgorithm;
use crate::resources::CpuEndpoint;
use crate::types::{ExecutionReport, Pcb, ProcessState, StopReason};

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Kernel {
    /// Dispatch READY processes while free CPUs remain
    pub(crate) fn run_short_term(self: &Arc<Self>) {
        while !self.queues.is_empty(ProcessState::Ready) {
            let Some(cpu) = self.cpus.acquire_free() else {
                debug!("No free CPU for {} ready processes", self.queues.len(ProcessState::Ready));
                break;
            };

            let Some(pcb) = self.select_next() else {
                self.cpus.release(&cpu.id);
                break;
            };

            self.dispatch(cpu, pcb);
        }
    }

    /// Pick the next READY process under the configured algorithm
    pub(crate) fn select_next(&self) -> Option<Arc<Pcb>> {
        match self.config.short_term_algorithm {
            ShortTermAlgorithm::Fifo => self.queues.front(ProcessState::Ready),
            ShortTermAlgorithm::Sjf | ShortTermAlgorithm::Srt => self.select_shortest(),
        }
    }

    /// Shortest estimate wins, first in queue order on ties. A process that
    /// never ran still carries the initial estimate; it is picked ahead of
    /// measured ones whenever that estimate is below the best measured one.
    fn select_shortest(&self) -> Option<Arc<Pcb>> {
        let initial = self.config.initial_estimate_ms;
        let candidates: Vec<(Arc<Pcb>, f64)> = self
            .queues
            .snapshot(ProcessState::Ready)
            .into_iter()
            .map(|pcb| {
                let estimate = pcb.estimated_burst();
                (pcb, estimate)
            })
            .collect();

        let unmeasured = |estimate: f64| (estimate - initial).abs() < f64::EPSILON;

        let first_unmeasured = candidates.iter().find(|(_, e)| unmeasured(*e));
        let best_measured = candidates
            .iter()
            .filter(|(_, e)| !unmeasured(*e))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match (first_unmeasured, best_measured) {
            (Some((pcb, _)), None) => Some(Arc::clone(pcb)),
            (Some((pcb, _)), Some((_, best))) if initial < *best => Some(Arc::clone(pcb)),
            _ => candidates
                .iter()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(pcb, _)| Arc::clone(pcb)),
        }
    }

    /// Bind `pcb` to a reserved CPU and start the burst
    fn dispatch(self: &Arc<Self>, cpu: CpuEndpoint, pcb: Arc<Pcb>) -> bool {
        let pid = pcb.pid();
        self.cpus.bind(&cpu.id, pid);

        if !self.transition_from(&pcb, ProcessState::Ready, ProcessState::Executing) {
            self.cpus.release(&cpu.id);
            return false;
        }

        debug!("Process {} dispatched to CPU {}", pid, cpu);
        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            kernel.execute_on_cpu(cpu, pcb).await;
        });
        true
    }

    /// Run one burst on `cpu` and act on the stop reason
    async fn execute_on_cpu(self: Arc<Self>, cpu: CpuEndpoint, pcb: Arc<Pcb>) {
        let pid = pcb.pid();
        let program_counter = pcb.program_counter();

        let report = match self.cpu_service.execute(&cpu, pid, program_counter).await {
            Ok(report) => report,
            Err(e) => {
                error!("CPU {} failed while executing process {}: {}", cpu, pid, e);
                self.cpus.release(&cpu.id);
                self.terminate(&pcb);
                self.bells.short_term.ring();
                return;
            }
        };

        if report.pid != pid {
            warn!("CPU {} reported process {} while running {}", cpu, report.pid, pid);
        }

        self.record_burst(&pcb, &report);
        self.cpus.release(&cpu.id);
        self.handle_stop(&pcb, report);
        self.bells.short_term.ring();
    }

    /// Fold a finished burst into the process: program counter, CPU time
    /// and the next-burst estimate
    fn record_burst(&self, pcb: &Arc<Pcb>, report: &ExecutionReport) {
        let mut data = pcb.lock();
        let now = Instant::now();
        let elapsed = data
            .burst_start
            .take()
            .map_or(0.0, |start| now.saturating_duration_since(start).as_secs_f64() * 1000.0);

        data.program_counter = report.program_counter;
        data.cpu_time += std::time::Duration::from_millis(report.elapsed_ms);

        if report.reason == StopReason::Interrupt {
            data.estimated_burst = self.estimator.after_interrupt(data.estimated_burst, elapsed);
        } else {
            data.real_burst = elapsed;
            data.estimated_burst = self.estimator.smooth(data.estimated_burst, elapsed);
        }
    }

    fn handle_stop(self: &Arc<Self>, pcb: &Arc<Pcb>, report: ExecutionReport) {
        let pid = pcb.pid();
        match report.reason {
            StopReason::Finish => {
                if self.transition_from(pcb, ProcessState::Executing, ProcessState::Exit) {
                    self.bells.long_term.ring();
                }
            }
            StopReason::Replan | StopReason::Interrupt => {
                if report.reason == StopReason::Interrupt {
                    info!("## ({}) Preempted at pc {}", pid, report.program_counter);
                }
                self.transition_from(pcb, ProcessState::Executing, ProcessState::Ready);
            }
            StopReason::Syscall => match report.syscall {
                Some(syscall) => self.handle_syscall(pcb, syscall),
                None => {
                    error!("Process {} stopped for a syscall without a payload", pid);
                    self.terminate(pcb);
                }
            },
            StopReason::Unknown => {
                warn!("Unknown stop reason for process {}, returning it to READY", pid);
                self.transition_from(pcb, ProcessState::Executing, ProcessState::Ready);
            }
        }
    }
}
