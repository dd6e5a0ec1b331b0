// src/engine/mod.rs

//! Supervision engine for taskline.
//!
//! This module ties together:
//! - the worker registry and spawn planning
//! - the batch and daemon completion protocols
//! - the control loop that reacts to:
//!   - worker exits (from the SIGCHLD reaper)
//!   - graceful-stop requests (SIGTERM, SIGINT, daemon SIGUSR1 or a `StopHandle`)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use nix::unistd::Pid;

use crate::ipc::BatchStatus;
use crate::types::PipelineKind;

/// Exit code a worker uses after it deliberately finished its share of work.
pub const FINISHED_EXIT_CODE: i32 = 0;

/// Exit code a worker uses when its callback returned (or failed) without
/// finishing.
pub const INCOMPLETE_EXIT_CODE: i32 = 1;

/// How a worker process ended, as observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Exited with [`FINISHED_EXIT_CODE`].
    Finished,
    /// Exited with any other code.
    Failed(i32),
    /// Terminated by a signal.
    Killed(i32),
}

impl WorkerOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        if code == FINISHED_EXIT_CODE {
            WorkerOutcome::Finished
        } else {
            WorkerOutcome::Failed(code)
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, WorkerOutcome::Finished)
    }
}

/// Events flowing into the supervisor's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A child process was reaped.
    WorkerExited { pid: Pid, outcome: WorkerOutcome },
    /// Graceful stop requested by a stop signal or a `StopHandle`.
    StopRequested,
}

/// Summary returned once the supervisor has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub name: String,
    pub kind: PipelineKind,
    /// Worker processes started, restarts included.
    pub spawned: usize,
    pub restarts: usize,
    /// Whether leftover workers had to be killed after the grace period.
    pub escalated: bool,
    /// Final `batchStatus` for batch pipelines.
    pub batch_status: Option<BatchStatus>,
}

pub mod core;
pub mod event_handlers;
pub mod protocol;
pub mod runtime;

pub use self::core::SupervisorCore;
pub use event_handlers::{CoreCommand, CoreStep};
pub use protocol::ExitDecision;
pub use runtime::Runtime;
