// src/topology/registry.rs

//! Live worker bookkeeping owned by the supervisor.

use std::collections::HashMap;

use nix::unistd::Pid;

use crate::types::Stage;

/// A reference to a specific downstream worker, as resolved at spawn time.
///
/// Workers never talk to a peer *process*; they talk to the peer stage's
/// queue. The reference is kept for inspection and for checking wiring order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRef {
    pub stage: Stage,
    pub index: usize,
    pub pid: Pid,
    /// Creation sequence number of the peer.
    pub seq: u64,
}

/// Everything the supervisor knows about one live worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: Pid,
    pub stage: Stage,
    pub index: usize,
    /// Monotonic creation sequence number across the whole run.
    pub seq: u64,
    pub next: Option<PeerRef>,
    /// Only ever set for left workers.
    pub after_next: Option<PeerRef>,
}

impl WorkerRecord {
    pub fn as_peer(&self) -> PeerRef {
        PeerRef {
            stage: self.stage,
            index: self.index,
            pid: self.pid,
            seq: self.seq,
        }
    }
}

/// Mapping from live pid to worker record.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<Pid, WorkerRecord>,
    next_seq: u64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next inserted worker will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Insert a record. Returns the previous record if the pid was already
    /// tracked (which callers treat as a protocol violation).
    pub fn insert(&mut self, record: WorkerRecord) -> Option<WorkerRecord> {
        self.next_seq = self.next_seq.max(record.seq + 1);
        self.workers.insert(record.pid, record)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<WorkerRecord> {
        self.workers.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&WorkerRecord> {
        self.workers.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn count_of(&self, stage: Stage) -> usize {
        self.workers.values().filter(|w| w.stage == stage).count()
    }

    /// Most recently created live worker of `stage`.
    pub fn latest_of(&self, stage: Stage) -> Option<&WorkerRecord> {
        self.workers
            .values()
            .filter(|w| w.stage == stage)
            .max_by_key(|w| w.seq)
    }

    /// Live worker currently occupying `(stage, index)`.
    pub fn find(&self, stage: Stage, index: usize) -> Option<&WorkerRecord> {
        self.workers
            .values()
            .find(|w| w.stage == stage && w.index == index)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.workers.keys().copied().collect()
    }

    /// Records ordered by creation sequence.
    pub fn records(&self) -> Vec<&WorkerRecord> {
        let mut records: Vec<_> = self.workers.values().collect();
        records.sort_by_key(|w| w.seq);
        records
    }
}
