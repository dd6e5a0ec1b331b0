// tests/runtime_fake_backend.rs

use std::error::Error;

use nix::unistd::Pid;
use tokio::sync::mpsc;
use tokio::time::Duration;

use taskline::engine::{Runtime, SupervisorCore, SupervisorEvent, WorkerOutcome};
use taskline::errors::TasklineError;
use taskline::ipc::BatchStatus;
use taskline::{PipelineKind, Stage};
use taskline_test_utils::builders::PipelineSpecBuilder;
use taskline_test_utils::fake_backend::{FIRST_FAKE_PID, FakeBackend};
use taskline_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn fake_pid(offset: i32) -> Pid {
    Pid::from_raw(FIRST_FAKE_PID + offset)
}

fn exited(pid: Pid, outcome: WorkerOutcome) -> SupervisorEvent {
    SupervisorEvent::WorkerExited { pid, outcome }
}

#[tokio::test]
async fn runtime_finishes_a_left_only_batch() -> TestResult {
    init_tracing();

    let core = SupervisorCore::create(PipelineSpecBuilder::batch("solo").workers(1, 0, 0).build())?;
    let (tx, rx) = mpsc::channel(16);
    let backend = FakeBackend::new();

    tx.send(exited(fake_pid(0), WorkerOutcome::Finished)).await?;

    let report = with_timeout(Runtime::new(core, rx, backend.clone()).run()).await?;

    assert_eq!(report.kind, PipelineKind::Batch);
    assert_eq!(report.spawned, 1);
    assert_eq!(report.restarts, 0);
    assert!(!report.escalated);
    assert_eq!(report.batch_status, Some(BatchStatus::CenterFinish));
    assert_eq!(backend.spawned().len(), 1);
    assert!(backend.killed().is_empty());
    Ok(())
}

#[tokio::test]
async fn runtime_restarts_crashed_daemon_workers_until_stopped() -> TestResult {
    init_tracing();

    // Creation order: right #0 (1000), center #0 (1001), left #0 (1002).
    let core = SupervisorCore::create(PipelineSpecBuilder::daemon("d").workers(1, 1, 1).build())?;
    let (tx, rx) = mpsc::channel(16);
    let backend = FakeBackend::new();

    tx.send(exited(fake_pid(1), WorkerOutcome::Killed(11))).await?;
    // The replacement center gets 1003.
    tx.send(SupervisorEvent::StopRequested).await?;
    for offset in [0, 2, 3] {
        tx.send(exited(fake_pid(offset), WorkerOutcome::Finished)).await?;
    }

    let report = with_timeout(Runtime::new(core, rx, backend.clone()).run()).await?;

    assert_eq!(report.spawned, 4);
    assert_eq!(report.restarts, 1);
    assert!(!report.escalated);
    assert_eq!(report.batch_status, None);

    let spawned = backend.spawned();
    let (pid, plan) = spawned.last().ok_or("nothing spawned")?;
    assert_eq!(*pid, fake_pid(3));
    assert_eq!((plan.stage, plan.index), (Stage::Center, 0));
    // The replacement is wired to the live right worker.
    assert_eq!(plan.next.map(|p| p.pid), Some(fake_pid(0)));
    Ok(())
}

#[tokio::test]
async fn runtime_escalates_after_the_grace_period() -> TestResult {
    init_tracing();

    let spec = PipelineSpecBuilder::daemon("stuck")
        .workers(0, 1, 0)
        .shutdown_grace(Duration::from_millis(50))
        .build();
    let core = SupervisorCore::create(spec)?;
    let (tx, rx) = mpsc::channel(16);
    let backend = FakeBackend::new().with_exit_on_kill(tx.clone());

    tx.send(SupervisorEvent::StopRequested).await?;

    let report = with_timeout(Runtime::new(core, rx, backend.clone()).run()).await?;

    assert!(report.escalated);
    assert_eq!(backend.killed(), vec![fake_pid(0)]);
    Ok(())
}

#[tokio::test]
async fn runtime_aborts_on_an_unknown_pid() -> TestResult {
    init_tracing();

    let core = SupervisorCore::create(PipelineSpecBuilder::daemon("d").workers(1, 0, 0).build())?;
    let (tx, rx) = mpsc::channel(16);

    tx.send(exited(Pid::from_raw(99_999), WorkerOutcome::Failed(1))).await?;

    let result = with_timeout(Runtime::new(core, rx, FakeBackend::new()).run()).await;
    assert!(
        matches!(result, Err(TasklineError::UnknownWorker(99_999))),
        "got {result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn runtime_exits_when_the_event_channel_closes() -> TestResult {
    let core = SupervisorCore::create(PipelineSpecBuilder::daemon("d").workers(1, 0, 0).build())?;
    let (tx, rx) = mpsc::channel(16);
    drop(tx);

    let report = with_timeout(Runtime::new(core, rx, FakeBackend::new()).run()).await?;
    assert_eq!(report.spawned, 1);
    Ok(())
}
