// src/engine/core.rs

//! Pure supervisor state machine.
//!
//! This module contains a synchronous, deterministic "core" that consumes
//! [`SupervisorEvent`]s and produces:
//! - an updated registry / shared table
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the channel fed by the reaper and stop listeners
//! - asking the backend to fork workers and registering the pids
//! - the shutdown grace period and SIGKILL escalation
//!
//! The core is intended to be unit tested without forking anything.

use nix::unistd::Pid;
use tracing::debug;

use crate::engine::event_handlers::{
    CoreCommand, CoreStep, ShutdownLatch, handle_stop_request, handle_worker_exit,
};
use crate::engine::{PipelineReport, SupervisorEvent};
use crate::errors::{Result, TasklineError};
use crate::ipc::SharedStateTable;
use crate::pipeline::PipelineSpec;
use crate::topology::{SpawnPlan, WorkerRecord, WorkerRegistry, creation_order};
use crate::types::{PipelineKind, Stage};

/// Pure supervisor state.
///
/// This owns:
/// - the authoritative (normalized) pipeline spec
/// - the worker registry
/// - a handle to the shared state table
/// - the shutdown latch
///
/// It has **no** channels, no Tokio types, and never forks.
#[derive(Debug)]
pub struct SupervisorCore {
    spec: PipelineSpec,
    table: SharedStateTable,
    registry: WorkerRegistry,
    latch: ShutdownLatch,
    spawned: usize,
    restarts: usize,
}

impl SupervisorCore {
    /// `spec` is normalized here, so callers may pass it raw.
    pub fn new(spec: PipelineSpec, table: SharedStateTable) -> Self {
        Self {
            spec: spec.normalized(),
            table,
            registry: WorkerRegistry::new(),
            latch: ShutdownLatch::default(),
            spawned: 0,
            restarts: 0,
        }
    }

    /// Normalize `spec` and map a fresh shared table seeded from it.
    pub fn create(spec: PipelineSpec) -> Result<Self> {
        let spec = spec.normalized();
        let table = SharedStateTable::create(&spec)?;
        Ok(Self::new(spec, table))
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn table(&self) -> &SharedStateTable {
        &self.table
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.latch.is_requested()
    }

    /// True once shutdown was requested and every worker has been reaped.
    pub fn is_finished(&self) -> bool {
        self.latch.is_requested() && self.registry.is_empty()
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Initial topology in mandated creation order.
    pub fn initial_order(&self) -> Vec<(Stage, usize)> {
        creation_order(&self.spec)
    }

    /// Plan a worker for `(stage, index)`, resolving peers against the
    /// workers registered so far.
    pub fn plan(&self, stage: Stage, index: usize) -> SpawnPlan {
        SpawnPlan::resolve(stage, index, &self.registry)
    }

    /// Record a freshly spawned worker.
    pub fn register(&mut self, plan: SpawnPlan, pid: Pid) -> Result<&WorkerRecord> {
        let record = WorkerRecord {
            pid,
            stage: plan.stage,
            index: plan.index,
            seq: self.registry.next_seq(),
            next: plan.next,
            after_next: plan.after_next,
        };

        if let Some(previous) = self.registry.insert(record) {
            return Err(TasklineError::ProtocolViolation(format!(
                "pid {pid} registered twice ({} #{} and {} #{})",
                previous.stage, previous.index, plan.stage, plan.index
            )));
        }

        self.spawned += 1;
        debug!(stage = %plan.stage, index = plan.index, %pid, "worker registered");

        self.registry
            .get(pid)
            .ok_or_else(|| TasklineError::ProtocolViolation(format!("pid {pid} vanished")))
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: SupervisorEvent) -> Result<CoreStep> {
        let step = match event {
            SupervisorEvent::WorkerExited { pid, outcome } => handle_worker_exit(
                &self.spec,
                &self.table,
                &mut self.registry,
                &mut self.latch,
                pid,
                outcome,
            )?,
            SupervisorEvent::StopRequested => {
                handle_stop_request(&self.spec, &self.table, &self.registry, &mut self.latch)?
            }
        };

        self.restarts += step
            .commands
            .iter()
            .filter(|c| matches!(c, CoreCommand::Respawn { .. }))
            .count();

        Ok(step)
    }

    /// Snapshot of the run for the caller of the supervisor.
    pub fn report(&self, escalated: bool) -> PipelineReport {
        let batch_status = match self.spec.kind {
            PipelineKind::Batch => self.table.batch_status().ok(),
            PipelineKind::Daemon => None,
        };
        PipelineReport {
            name: self.spec.name.clone(),
            kind: self.spec.kind,
            spawned: self.spawned,
            restarts: self.restarts,
            escalated,
            batch_status,
        }
    }
}
