// src/exec/reaper.rs

//! Turn OS signals into supervisor events.
//!
//! Nothing here touches the worker registry: the signal streams only wake
//! these tasks, which reap children with `waitpid` and forward plain events
//! into the control loop's channel.

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{SupervisorEvent, WorkerOutcome};
use crate::errors::Result;
use crate::types::PipelineKind;

/// Install the SIGCHLD listener and spawn the reaper task.
///
/// Must be called from inside the supervisor's runtime, and before the
/// first worker is forked, so no exit can slip past unobserved.
pub fn spawn_reaper(tx: mpsc::Sender<SupervisorEvent>) -> Result<JoinHandle<()>> {
    let mut sigchld = signal(SignalKind::child())?;

    Ok(tokio::spawn(async move {
        debug!("reaper started");
        while sigchld.recv().await.is_some() {
            // Signals coalesce: drain every exited child per wakeup.
            for event in reap_exited() {
                if tx.send(event).await.is_err() {
                    debug!("supervisor channel closed; reaper stopping");
                    return;
                }
            }
        }
    }))
}

/// Install the graceful-stop listeners.
///
/// SIGTERM and SIGINT stop any pipeline; SIGUSR1 is the daemon stop
/// request. Each delivery becomes one `StopRequested` event, so the
/// supervisor still tears down the queues on its way out.
pub fn spawn_stop_listeners(
    tx: mpsc::Sender<SupervisorEvent>,
    kind: PipelineKind,
) -> Result<Vec<JoinHandle<()>>> {
    let mut signals = vec![
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
    ];
    if kind == PipelineKind::Daemon {
        signals.push((SignalKind::user_defined1(), "SIGUSR1"));
    }

    signals
        .into_iter()
        .map(|(kind, label)| forward_stop_signal(kind, label, tx.clone()))
        .collect()
}

fn forward_stop_signal(
    kind: SignalKind,
    label: &'static str,
    tx: mpsc::Sender<SupervisorEvent>,
) -> Result<JoinHandle<()>> {
    let mut stream = signal(kind)?;

    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            info!(signal = label, "requesting graceful stop");
            if tx.send(SupervisorEvent::StopRequested).await.is_err() {
                return;
            }
        }
    }))
}

/// Collect every child that has exited so far, without blocking.
pub fn reap_exited() -> Vec<SupervisorEvent> {
    let mut events = Vec::new();

    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, code)) => events.push(SupervisorEvent::WorkerExited {
                pid,
                outcome: WorkerOutcome::from_exit_code(code),
            }),
            Ok(WaitStatus::Signaled(pid, sig, _core_dumped)) => {
                events.push(SupervisorEvent::WorkerExited {
                    pid,
                    outcome: WorkerOutcome::Killed(sig as i32),
                })
            }
            Ok(other) => debug!(status = ?other, "ignoring non-exit child status"),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }

    events
}
