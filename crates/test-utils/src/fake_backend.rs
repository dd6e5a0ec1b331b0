use std::sync::{Arc, Mutex};

use nix::unistd::Pid;
use tokio::sync::mpsc;
use taskline::engine::{SupervisorEvent, WorkerOutcome};
use taskline::errors::Result;
use taskline::exec::WorkerBackend;
use taskline::topology::SpawnPlan;

/// First pid handed out by `FakeBackend`.
pub const FIRST_FAKE_PID: i32 = 1000;

/// A fake backend that:
/// - records every spawn plan it is handed, in order
/// - hands out synthetic, increasing pids
/// - records kills and, if wired to the supervisor channel, reports the
///   killed worker as exited by SIGKILL.
#[derive(Clone)]
pub struct FakeBackend {
    spawned: Arc<Mutex<Vec<(Pid, SpawnPlan)>>>,
    killed: Arc<Mutex<Vec<Pid>>>,
    next_pid: Arc<Mutex<i32>>,
    exit_on_kill: Option<mpsc::Sender<SupervisorEvent>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            spawned: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(Mutex::new(FIRST_FAKE_PID)),
            exit_on_kill: None,
        }
    }

    /// Report killed workers as `WorkerExited` on `tx`.
    pub fn with_exit_on_kill(mut self, tx: mpsc::Sender<SupervisorEvent>) -> Self {
        self.exit_on_kill = Some(tx);
        self
    }

    pub fn spawned(&self) -> Vec<(Pid, SpawnPlan)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<Pid> {
        self.killed.lock().unwrap().clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBackend for FakeBackend {
    fn spawn_worker(&mut self, plan: &SpawnPlan) -> Result<Pid> {
        let pid = {
            let mut next = self.next_pid.lock().unwrap();
            let pid = Pid::from_raw(*next);
            *next += 1;
            pid
        };
        self.spawned.lock().unwrap().push((pid, plan.clone()));
        Ok(pid)
    }

    fn kill_worker(&mut self, pid: Pid) -> Result<()> {
        self.killed.lock().unwrap().push(pid);
        if let Some(tx) = &self.exit_on_kill {
            tx.try_send(SupervisorEvent::WorkerExited {
                pid,
                outcome: WorkerOutcome::Killed(9),
            })
            .map_err(|e| anyhow::anyhow!("fake backend could not report kill: {e}"))?;
        }
        Ok(())
    }
}

/// Build the initial topology of `core` on `backend`, the way the runtime
/// does, without an event loop.
pub fn spawn_topology(
    core: &mut taskline::engine::SupervisorCore,
    backend: &mut FakeBackend,
) -> Result<Vec<Pid>> {
    let mut pids = Vec::new();
    for (stage, index) in core.initial_order() {
        let plan = core.plan(stage, index);
        let pid = backend.spawn_worker(&plan)?;
        core.register(plan, pid)?;
        pids.push(pid);
    }
    Ok(pids)
}

/// Spawn a replacement for `(stage, index)` after a `Respawn` command.
pub fn respawn(
    core: &mut taskline::engine::SupervisorCore,
    backend: &mut FakeBackend,
    stage: taskline::Stage,
    index: usize,
) -> Result<Pid> {
    let plan = core.plan(stage, index);
    let pid = backend.spawn_worker(&plan)?;
    core.register(plan, pid)?;
    Ok(pid)
}
