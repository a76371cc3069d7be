//! Process Queues
//!
//! One ordered queue per lifecycle state. All seven queues sit behind a
//! single lock so a move between two of them is observed atomically: a
//! process is seen in exactly one queue, never two.
//!
//! The set never locks a PCB. Ordered inserts into READY use a key
//! captured by the caller while it holds the PCB lock.

use crate::types::{Pcb, Pid, ProcessState};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Queue entry with its ordering key
#[derive(Debug, Clone)]
struct QueueEntry {
    pcb: Arc<Pcb>,
    /// Estimated burst at insertion time
    key: f64,
}

/// Where to place a process in its new queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Append at the tail
    Back,
    /// First-fit by ascending key, after equal keys
    Ordered(f64),
}

/// The kernel's seven process queues
pub struct QueueSet {
    queues: Mutex<[VecDeque<QueueEntry>; 7]>,
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSet {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Default::default()),
        }
    }

    /// Insert a process into the queue for `state`
    pub fn insert(&self, state: ProcessState, pcb: Arc<Pcb>, placement: Placement) {
        let mut queues = self.queues.lock();
        Self::insert_internal(&mut queues[state.index()], pcb, placement);
    }

    /// Move a process from the queue it is in to the queue for `to`.
    ///
    /// The `from` queue is searched first, then every other queue, because
    /// the caller's view may be stale. Returns false if the process was not
    /// queued anywhere; it is inserted into `to` regardless.
    pub fn relocate(&self, pcb: &Arc<Pcb>, from: ProcessState, to: ProcessState, placement: Placement) -> bool {
        let mut queues = self.queues.lock();
        let pid = pcb.pid();

        let mut found = Self::remove_internal(&mut queues[from.index()], pid).is_some();
        if !found {
            for state in ProcessState::ALL {
                if state != from && Self::remove_internal(&mut queues[state.index()], pid).is_some() {
                    warn!("Process {} expected in {} but found in {}", pid, from, state);
                    found = true;
                    break;
                }
            }
        }

        Self::insert_internal(&mut queues[to.index()], Arc::clone(pcb), placement);
        found
    }

    /// Remove a process from the queue for `state`
    pub fn remove(&self, state: ProcessState, pid: Pid) -> Option<Arc<Pcb>> {
        let mut queues = self.queues.lock();
        Self::remove_internal(&mut queues[state.index()], pid)
    }

    /// Head of the queue for `state`
    pub fn front(&self, state: ProcessState) -> Option<Arc<Pcb>> {
        self.queues.lock()[state.index()]
            .front()
            .map(|e| Arc::clone(&e.pcb))
    }

    /// Find a process by pid in the queue for `state`
    pub fn find(&self, state: ProcessState, pid: Pid) -> Option<Arc<Pcb>> {
        self.queues.lock()[state.index()]
            .iter()
            .find(|e| e.pcb.pid() == pid)
            .map(|e| Arc::clone(&e.pcb))
    }

    /// Check if a process is in the queue for `state`
    pub fn contains(&self, state: ProcessState, pid: Pid) -> bool {
        self.queues.lock()[state.index()]
            .iter()
            .any(|e| e.pcb.pid() == pid)
    }

    /// Copy of the queue for `state`, in queue order
    pub fn snapshot(&self, state: ProcessState) -> Vec<Arc<Pcb>> {
        self.queues.lock()[state.index()]
            .iter()
            .map(|e| Arc::clone(&e.pcb))
            .collect()
    }

    /// Every queued process, grouped by queue
    pub fn all(&self) -> Vec<Arc<Pcb>> {
        self.queues
            .lock()
            .iter()
            .flat_map(|q| q.iter().map(|e| Arc::clone(&e.pcb)))
            .collect()
    }

    /// States whose queue currently holds `pid`
    pub fn locate(&self, pid: Pid) -> Vec<ProcessState> {
        let queues = self.queues.lock();
        ProcessState::ALL
            .iter()
            .copied()
            .filter(|s| queues[s.index()].iter().any(|e| e.pcb.pid() == pid))
            .collect()
    }

    pub fn len(&self, state: ProcessState) -> usize {
        self.queues.lock()[state.index()].len()
    }

    pub fn is_empty(&self, state: ProcessState) -> bool {
        self.queues.lock()[state.index()].is_empty()
    }

    /// Queue lengths, indexed like [`ProcessState::ALL`]
    pub fn lengths(&self) -> [usize; 7] {
        let queues = self.queues.lock();
        let mut lengths = [0; 7];
        for (len, queue) in lengths.iter_mut().zip(queues.iter()) {
            *len = queue.len();
        }
        lengths
    }

    fn insert_internal(queue: &mut VecDeque<QueueEntry>, pcb: Arc<Pcb>, placement: Placement) {
        match placement {
            Placement::Back => queue.push_back(QueueEntry { pcb, key: 0.0 }),
            Placement::Ordered(key) => {
                let at = queue
                    .iter()
                    .position(|e| e.key > key)
                    .unwrap_or(queue.len());
                queue.insert(at, QueueEntry { pcb, key });
            }
        }
    }

    fn remove_internal(queue: &mut VecDeque<QueueEntry>, pid: Pid) -> Option<Arc<Pcb>> {
        let at = queue.iter().position(|e| e.pcb.pid() == pid)?;
        queue.remove(at).map(|e| e.pcb)
    }
}

impl std::fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lengths = self.lengths();
        let mut s = f.debug_struct("QueueSet");
        for state in ProcessState::ALL {
            s.field(&state.to_string(), &lengths[state.index()]);
        }
        s.finish()
    }
}
