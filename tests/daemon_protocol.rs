// tests/daemon_protocol.rs

use std::error::Error;

use nix::unistd::Pid;
use taskline::engine::protocol::try_finish_share;
use taskline::engine::{CoreCommand, SupervisorCore, SupervisorEvent, WorkerOutcome};
use taskline::errors::TasklineError;
use taskline::ipc::StateKey;
use taskline::Stage;
use taskline_test_utils::builders::PipelineSpecBuilder;
use taskline_test_utils::fake_backend::{FakeBackend, respawn, spawn_topology};
use taskline_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn exited(pid: Pid, outcome: WorkerOutcome) -> SupervisorEvent {
    SupervisorEvent::WorkerExited { pid, outcome }
}

fn daemon_core(left: usize, center: usize, right: usize) -> Result<(SupervisorCore, FakeBackend), Box<dyn Error>> {
    let mut core = SupervisorCore::create(
        PipelineSpecBuilder::daemon("daemon")
            .workers(left, center, right)
            .build(),
    )?;
    let mut backend = FakeBackend::new();
    spawn_topology(&mut core, &mut backend)?;
    Ok((core, backend))
}

#[test]
fn crash_is_replaced_at_the_same_stage_and_index() -> TestResult {
    init_tracing();

    let (mut core, mut backend) = daemon_core(1, 2, 1)?;
    let before = core.registry().len();
    let victim = core
        .registry()
        .find(Stage::Center, 1)
        .ok_or("center #1 missing")?
        .pid;

    let step = core.step(exited(victim, WorkerOutcome::Failed(101)))?;
    assert_eq!(
        step.commands,
        vec![CoreCommand::Respawn {
            stage: Stage::Center,
            index: 1
        }]
    );
    assert!(step.keep_running);

    let replacement = respawn(&mut core, &mut backend, Stage::Center, 1)?;
    assert_eq!(core.registry().len(), before);
    let record = core.registry().get(replacement).ok_or("replacement not registered")?;
    assert_eq!((record.stage, record.index), (Stage::Center, 1));
    assert!(core.registry().get(victim).is_none());
    Ok(())
}

#[test]
fn clean_exit_before_a_stop_is_still_restarted() -> TestResult {
    let (mut core, _backend) = daemon_core(1, 1, 1)?;
    let left = core.registry().find(Stage::Left, 0).ok_or("left missing")?.pid;

    let step = core.step(exited(left, WorkerOutcome::Finished))?;
    assert_eq!(
        step.commands,
        vec![CoreCommand::Respawn {
            stage: Stage::Left,
            index: 0
        }]
    );
    Ok(())
}

#[test]
fn stop_request_raises_the_flag_and_stops_restarts() -> TestResult {
    init_tracing();

    let (mut core, _backend) = daemon_core(1, 1, 1)?;
    assert!(!core.table().immediate_exit_requested()?);

    let step = core.step(SupervisorEvent::StopRequested)?;
    assert_eq!(step.commands, vec![CoreCommand::RequestShutdown]);
    assert!(step.keep_running);
    assert!(core.table().immediate_exit_requested()?);

    // A second request is absorbed.
    let step = core.step(SupervisorEvent::StopRequested)?;
    assert!(step.commands.is_empty());

    let pids = core.registry().pids();
    let last = pids.len() - 1;
    for (i, pid) in pids.into_iter().enumerate() {
        let step = core.step(exited(pid, WorkerOutcome::Failed(1)))?;
        assert!(step.commands.is_empty(), "no restarts during shutdown");
        assert_eq!(step.keep_running, i != last);
    }
    assert!(core.is_finished());
    assert_eq!(core.restarts(), 0);
    Ok(())
}

#[test]
fn raised_flag_turns_the_next_exit_into_termination() -> TestResult {
    let (mut core, _backend) = daemon_core(1, 1, 0)?;
    core.table().set(StateKey::DaemonImmediateExit, 1)?;

    let center = core.registry().find(Stage::Center, 0).ok_or("center missing")?.pid;
    let step = core.step(exited(center, WorkerOutcome::Finished))?;
    assert_eq!(step.commands, vec![CoreCommand::RequestShutdown]);
    assert!(step.keep_running, "the left worker is still alive");
    Ok(())
}

#[test]
fn workers_acknowledge_the_flag_by_decrementing_their_counter() -> TestResult {
    let (core, _backend) = daemon_core(1, 2, 1)?;
    let table = core.table();

    assert!(!try_finish_share(table, Stage::Center, || Ok(true))?);
    assert_eq!(table.get(StateKey::DaemonCenterUnfinished)?, 2);

    table.set(StateKey::DaemonImmediateExit, 1)?;
    assert!(try_finish_share(table, Stage::Center, || Ok(false))?, "queues are not drained");
    assert_eq!(table.get(StateKey::DaemonCenterUnfinished)?, 1);
    assert!(try_finish_share(table, Stage::Right, || Ok(true))?);
    assert_eq!(table.get(StateKey::DaemonRightUnfinished)?, 0);
    assert!(try_finish_share(table, Stage::Left, || Ok(true))?);
    Ok(())
}

#[test]
fn exit_of_an_unknown_pid_is_fatal() -> TestResult {
    let (mut core, _backend) = daemon_core(1, 1, 1)?;

    let err = core
        .step(exited(Pid::from_raw(4242), WorkerOutcome::Finished))
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, TasklineError::UnknownWorker(4242)), "got {err:?}");
    Ok(())
}

#[test]
fn registering_a_pid_twice_is_a_protocol_violation() -> TestResult {
    let (mut core, _backend) = daemon_core(1, 1, 1)?;
    let existing = core.registry().find(Stage::Left, 0).ok_or("left missing")?.pid;

    let plan = core.plan(Stage::Left, 0);
    let err = core.register(plan, existing).err().ok_or("expected an error")?;
    assert!(matches!(err, TasklineError::ProtocolViolation(_)), "got {err:?}");
    Ok(())
}
