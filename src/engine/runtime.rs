// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::WorkerBackend;
use crate::types::Stage;

use super::core::SupervisorCore;
use super::{CoreCommand, PipelineReport, SupervisorEvent};

/// Drives the supervisor core in response to `SupervisorEvent`s, and
/// delegates process creation to a `WorkerBackend`.
///
/// This is a pure IO shell around `SupervisorCore`, which contains all the
/// supervision semantics. This struct handles async IO: reading events from
/// the channel, spawning workers in order, and escalating a stalled
/// shutdown.
pub struct Runtime<B: WorkerBackend> {
    core: SupervisorCore,
    event_rx: mpsc::Receiver<SupervisorEvent>,
    backend: B,
    /// When the shutdown grace period runs out, if shutdown was requested.
    kill_deadline: Option<Instant>,
    escalated: bool,
}

impl<B: WorkerBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("escalated", &self.escalated)
            .finish_non_exhaustive()
    }
}

impl<B: WorkerBackend> Runtime<B> {
    pub fn new(
        core: SupervisorCore,
        event_rx: mpsc::Receiver<SupervisorEvent>,
        backend: B,
    ) -> Self {
        Self {
            core,
            event_rx,
            backend,
            kill_deadline: None,
            escalated: false,
        }
    }

    /// Build the topology, then run the control loop until the core reports
    /// that the pipeline is finished.
    ///
    /// Fatal protocol violations (e.g. an exit for an unknown pid) abort the
    /// loop and are returned to the caller.
    pub async fn run(mut self) -> Result<PipelineReport> {
        info!(
            name = %self.core.spec().name,
            kind = ?self.core.spec().kind,
            mode = ?self.core.spec().mode,
            "supervisor started"
        );

        self.spawn_topology()?;

        while !self.core.is_finished() {
            let Some(event) = self.next_event().await? else {
                info!("supervisor event channel closed; exiting");
                break;
            };

            debug!(?event, "supervisor received event");

            let step = self.core.step(event)?;

            for command in step.commands {
                self.execute_command(command)?;
            }

            if !step.keep_running {
                break;
            }
        }

        info!(
            spawned = self.core.spawned(),
            restarts = self.core.restarts(),
            "supervisor exiting"
        );
        Ok(self.core.report(self.escalated))
    }

    pub fn core(&self) -> &SupervisorCore {
        &self.core
    }

    /// Create every worker in the mandated right -> center -> left order.
    ///
    /// Strictly sequential: each worker is registered before the next one is
    /// planned, so upstream workers are wired to live downstream peers.
    fn spawn_topology(&mut self) -> Result<()> {
        for (stage, index) in self.core.initial_order() {
            self.spawn_one(stage, index)?;
        }
        info!(workers = self.core.registry().len(), "topology created");
        Ok(())
    }

    fn spawn_one(&mut self, stage: Stage, index: usize) -> Result<()> {
        let plan = self.core.plan(stage, index);
        let pid = self.backend.spawn_worker(&plan)?;
        self.core.register(plan, pid)?;
        Ok(())
    }

    /// Wait for the next event, escalating once the shutdown grace period
    /// has run out.
    async fn next_event(&mut self) -> Result<Option<SupervisorEvent>> {
        loop {
            match self.kill_deadline {
                Some(deadline) if !self.escalated => {
                    match timeout_at(deadline, self.event_rx.recv()).await {
                        Ok(event) => return Ok(event),
                        Err(_) => self.escalate()?,
                    }
                }
                _ => return Ok(self.event_rx.recv().await),
            }
        }
    }

    /// Execute a single command from the core.
    fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Respawn { stage, index } => {
                self.spawn_one(stage, index)?;
            }
            CoreCommand::RequestShutdown => {
                let grace = self.core.spec().shutdown_grace;
                info!(
                    live = self.core.registry().len(),
                    grace_ms = grace.as_millis() as u64,
                    "shutdown requested; waiting for workers to exit"
                );
                self.kill_deadline = Some(Instant::now() + grace);
            }
        }
        Ok(())
    }

    /// Forced termination of every worker still alive after the grace period.
    fn escalate(&mut self) -> Result<()> {
        self.escalated = true;
        let pids = self.core.registry().pids();
        warn!(
            remaining = pids.len(),
            "shutdown grace period elapsed; killing remaining workers"
        );
        for pid in pids {
            self.backend.kill_worker(pid)?;
        }
        Ok(())
    }
}
