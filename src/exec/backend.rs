// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The runtime talks to a `WorkerBackend` instead of calling `fork`
//! directly. This makes it easy to swap in a fake backend in tests while
//! keeping the production implementation here.
//!
//! - `ForkBackend` is the implementation used by `TaskExecutor`. It forks
//!   the supervisor and runs the stage callback in the child.
//! - Tests can provide their own `WorkerBackend` that, for example, records
//!   spawn plans and hands out synthetic pids.

use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{ForkResult, Pid, fork, getpid};
use tracing::{debug, info};

use crate::errors::Result;
use crate::ipc::{PipelineQueues, SharedStateTable};
use crate::pipeline::PipelineSpec;
use crate::topology::SpawnPlan;
use crate::worker::{ErrorHandler, StageCallbacks, WorkerSeed, run_worker_process};

/// Trait abstracting how workers are started and stopped.
///
/// Production code uses [`ForkBackend`]; tests can provide their own
/// implementation that doesn't create real processes.
pub trait WorkerBackend: Send {
    /// Start a worker for `plan` and return its pid.
    fn spawn_worker(&mut self, plan: &SpawnPlan) -> Result<Pid>;

    /// Forcefully terminate a worker. A worker that is already gone is not
    /// an error.
    fn kill_worker(&mut self, pid: Pid) -> Result<()>;
}

/// Real backend: one forked process per worker.
pub struct ForkBackend {
    spec: PipelineSpec,
    master_pid: Pid,
    table: SharedStateTable,
    queues: PipelineQueues,
    callbacks: StageCallbacks,
    error_handler: Arc<dyn ErrorHandler>,
}

impl ForkBackend {
    pub fn new(
        spec: PipelineSpec,
        table: SharedStateTable,
        queues: PipelineQueues,
        callbacks: StageCallbacks,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            spec,
            master_pid: getpid(),
            table,
            queues,
            callbacks,
            error_handler,
        }
    }
}

impl WorkerBackend for ForkBackend {
    fn spawn_worker(&mut self, plan: &SpawnPlan) -> Result<Pid> {
        let seed = WorkerSeed {
            spec: self.spec.clone(),
            plan: plan.clone(),
            master_pid: self.master_pid,
            table: self.table.clone(),
            queues: self.queues,
            callback: self.callbacks.get(plan.stage),
            error_handler: Arc::clone(&self.error_handler),
        };

        // SAFETY: the supervisor runs on a single-threaded runtime, and the
        // child immediately hands off to `run_worker_process`, which never
        // returns into the supervisor's code.
        match unsafe { fork() }? {
            ForkResult::Child => run_worker_process(seed),
            ForkResult::Parent { child } => {
                info!(
                    stage = %plan.stage,
                    index = plan.index,
                    pid = %child,
                    next = ?plan.next.map(|p| p.pid.as_raw()),
                    after_next = ?plan.after_next.map(|p| p.pid.as_raw()),
                    "worker spawned"
                );
                Ok(child)
            }
        }
    }

    fn kill_worker(&mut self, pid: Pid) -> Result<()> {
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => {
                debug!(%pid, "sent SIGKILL to worker");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
