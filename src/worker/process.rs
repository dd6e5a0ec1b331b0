// src/worker/process.rs

//! Body of a forked worker process.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use nix::sys::signal::{SigHandler, Signal, signal};
use nix::unistd::{Pid, getpid};
use tracing::{debug, info};

use crate::engine::{FINISHED_EXIT_CODE, INCOMPLETE_EXIT_CODE};
use crate::exec::naming::{set_process_name, worker_name, worker_title};
use crate::ipc::{PipelineQueues, SharedStateTable};
use crate::pipeline::PipelineSpec;
use crate::topology::{PeerRef, SpawnPlan};
use crate::types::{PipelineKind, Stage};
use crate::worker::callbacks::{ErrorHandler, StageCallback};
use crate::worker::context::{PeerHandle, WorkerContext};

/// Everything a child needs, captured in the supervisor before `fork`.
pub struct WorkerSeed {
    pub spec: PipelineSpec,
    pub plan: SpawnPlan,
    pub master_pid: Pid,
    pub table: SharedStateTable,
    pub queues: PipelineQueues,
    pub callback: Option<StageCallback>,
    pub error_handler: Arc<dyn ErrorHandler>,
}

impl WorkerSeed {
    fn peer(&self, peer: Option<PeerRef>) -> Option<PeerHandle> {
        let peer = peer?;
        let queue = self.queues.inbound(peer.stage)?;
        Some(PeerHandle { peer, queue })
    }

    fn context(&self, pid: Pid) -> WorkerContext {
        WorkerContext {
            name: self.spec.name.clone(),
            kind: self.spec.kind,
            mode: self.spec.mode,
            stage: self.plan.stage,
            index: self.plan.index,
            master_pid: self.master_pid,
            pid,
            timeout: self.spec.timeout,
            inbound: self.queues.inbound(self.plan.stage),
            next: self.peer(self.plan.next),
            after_next: match self.plan.stage {
                Stage::Left => self.peer(self.plan.after_next),
                Stage::Center | Stage::Right => None,
            },
            table: self.table.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Entry point of the child side of `fork`. Never returns.
///
/// The stage callback runs on a fresh thread with its own current-thread
/// runtime: the forked copy of the supervisor's thread still believes it is
/// inside the supervisor's runtime, so no runtime may be started on it.
pub fn run_worker_process(seed: WorkerSeed) -> ! {
    // Signal handlers inherited from the supervisor write into the
    // supervisor's signal pipe; detach from them.
    // SAFETY: restoring default dispositions has no preconditions.
    unsafe {
        let _ = signal(Signal::SIGCHLD, SigHandler::SigDfl);
        let _ = signal(Signal::SIGUSR1, SigHandler::SigDfl);
        let _ = signal(Signal::SIGTERM, SigHandler::SigDfl);
        let _ = signal(Signal::SIGINT, SigHandler::SigDfl);
    }

    let stage = seed.plan.stage;
    let index = seed.plan.index;
    set_process_name(&worker_name(&seed.spec.name, stage, index));

    let error_handler = Arc::clone(&seed.error_handler);
    let code = match std::thread::Builder::new()
        .name(format!("{stage}-{index}"))
        .spawn(move || worker_main(seed))
    {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            error_handler.handle_error(stage, index, &anyhow::anyhow!("stage callback panicked"));
            INCOMPLETE_EXIT_CODE
        }),
        Err(e) => {
            error_handler.handle_error(stage, index, &anyhow::Error::from(e));
            INCOMPLETE_EXIT_CODE
        }
    };

    std::process::exit(code)
}

/// Run the stage callback and pick the exit code.
fn worker_main(seed: WorkerSeed) -> i32 {
    let pid = getpid();
    let ctx = seed.context(pid);
    let stage = ctx.stage;
    let index = ctx.index;

    let title = worker_title(&seed.spec.name, stage, index);
    info!(%title, %pid, "worker started");

    let Some(callback) = seed.callback.clone() else {
        debug!(%stage, index, "no callback registered for stage");
        return INCOMPLETE_EXIT_CODE;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            seed.error_handler
                .handle_error(stage, index, &anyhow::Error::from(e));
            return INCOMPLETE_EXIT_CODE;
        }
    };

    let result = runtime.block_on(callback(ctx.clone()));

    match result {
        Ok(()) => {
            // A batch left worker finishes simply by returning.
            if seed.spec.kind == PipelineKind::Batch && stage == Stage::Left {
                ctx.mark_finished();
            }
        }
        Err(err) => seed.error_handler.handle_error(stage, index, &err),
    }

    exit_code_for(&ctx)
}

fn exit_code_for(ctx: &WorkerContext) -> i32 {
    if ctx.is_finished() {
        FINISHED_EXIT_CODE
    } else {
        INCOMPLETE_EXIT_CODE
    }
}
