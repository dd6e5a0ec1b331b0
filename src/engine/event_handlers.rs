// src/engine/event_handlers.rs

//! Event handling logic for the supervisor core.

use nix::unistd::Pid;
use tracing::{info, warn};

use crate::errors::{Result, TasklineError};
use crate::ipc::{SharedStateTable, StateKey};
use crate::pipeline::PipelineSpec;
use crate::topology::WorkerRegistry;
use crate::types::{PipelineKind, Stage};

use super::WorkerOutcome;
use super::protocol::{ExitDecision, exit_decision};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Start a fresh worker in this slot, with freshly resolved peers.
    Respawn { stage: Stage, index: usize },
    /// Stop restarting and wind the pipeline down. Issued at most once.
    RequestShutdown,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer control loop should keep running.
    pub keep_running: bool,
}

/// Shutdown latch. Requesting twice is a no-op.
#[derive(Debug, Default)]
pub struct ShutdownLatch {
    requested: bool,
}

impl ShutdownLatch {
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// Flip the latch; pushes `RequestShutdown` only on the first call.
    pub fn request(&mut self, commands: &mut Vec<CoreCommand>) {
        if !self.requested {
            self.requested = true;
            commands.push(CoreCommand::RequestShutdown);
        }
    }
}

fn keep_running(latch: &ShutdownLatch, registry: &WorkerRegistry) -> bool {
    !(latch.is_requested() && registry.is_empty())
}

/// Handle a reaped worker.
///
/// - An untracked pid is fatal.
/// - During shutdown nothing is restarted.
/// - Otherwise the completion protocol decides between restart, retire and
///   pipeline completion.
pub fn handle_worker_exit(
    spec: &PipelineSpec,
    table: &SharedStateTable,
    registry: &mut WorkerRegistry,
    latch: &mut ShutdownLatch,
    pid: Pid,
    outcome: WorkerOutcome,
) -> Result<CoreStep> {
    let record = registry
        .remove(pid)
        .ok_or(TasklineError::UnknownWorker(pid.as_raw()))?;

    let mut commands = Vec::new();

    if latch.is_requested() {
        info!(
            stage = %record.stage,
            index = record.index,
            %pid,
            ?outcome,
            remaining = registry.len(),
            "worker exited during shutdown"
        );
        return Ok(CoreStep {
            commands,
            keep_running: keep_running(latch, registry),
        });
    }

    match exit_decision(spec, table, record.stage, outcome)? {
        ExitDecision::Restart => {
            warn!(
                stage = %record.stage,
                index = record.index,
                %pid,
                ?outcome,
                "worker exited; restarting"
            );
            commands.push(CoreCommand::Respawn {
                stage: record.stage,
                index: record.index,
            });
        }
        ExitDecision::Retire => {
            info!(
                stage = %record.stage,
                index = record.index,
                %pid,
                "worker finished its share"
            );
        }
        ExitDecision::Complete => {
            info!(
                stage = %record.stage,
                index = record.index,
                %pid,
                "pipeline complete; terminating"
            );
            latch.request(&mut commands);
        }
    }

    Ok(CoreStep {
        commands,
        keep_running: keep_running(latch, registry),
    })
}

/// Handle a graceful-stop request.
///
/// For daemon pipelines this raises the one-way `daemonImmediateExit` flag
/// so workers stop without draining their queues.
pub fn handle_stop_request(
    spec: &PipelineSpec,
    table: &SharedStateTable,
    registry: &WorkerRegistry,
    latch: &mut ShutdownLatch,
) -> Result<CoreStep> {
    let mut commands = Vec::new();

    if spec.kind == PipelineKind::Daemon {
        table.set(StateKey::DaemonImmediateExit, 1)?;
    }

    if !latch.is_requested() {
        info!(live = registry.len(), "graceful stop requested");
    }
    latch.request(&mut commands);

    Ok(CoreStep {
        commands,
        keep_running: keep_running(latch, registry),
    })
}
