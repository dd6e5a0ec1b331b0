// tests/process_pipeline.rs
//
// End-to-end runs with real forked workers. The supervisor reaps with
// `waitpid(-1)`, so these tests must not overlap with each other.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, getpid};
use serial_test::serial;

use taskline::errors::TasklineError;
use taskline::ipc::{BatchStatus, SharedStateTable, StateKey, stage_queue_key};
use taskline::{
    ErrorHandler, ExecutionMode, PipelineKind, Stage, StageEvent, TaskExecutor, WorkerContext,
};
use taskline_test_utils::builders::PipelineSpecBuilder;
use taskline_test_utils::{init_tracing, unique_name};

type TestResult = Result<(), Box<dyn Error>>;

/// Record how many items a worker handled, one file per worker process.
fn record_count(dir: &Path, ctx: &WorkerContext, count: u64) -> anyhow::Result<()> {
    let file = dir.join(format!("{}-{}-{}", ctx.stage(), ctx.index(), ctx.pid()));
    fs::write(file, count.to_string())?;
    Ok(())
}

fn total_count(dir: &Path, prefix: &str) -> Result<u64, Box<dyn Error>> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            total += fs::read_to_string(entry.path())?.trim().parse::<u64>()?;
        }
    }
    Ok(total)
}

/// Writes every reported failure to its own file.
struct RecordingHandler {
    dir: PathBuf,
}

impl ErrorHandler for RecordingHandler {
    fn handle_error(&self, stage: Stage, index: usize, error: &anyhow::Error) {
        let file = self
            .dir
            .join(format!("error-{stage}-{index}-{}", std::process::id()));
        let _ = fs::write(file, format!("{error:#}"));
    }
}

fn recorded_errors(dir: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let mut errors = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("error-center-0-") {
            errors.push(fs::read_to_string(entry.path())?);
        }
    }
    Ok(errors)
}

/// Bump a counter file and return its previous value.
fn next_attempt(counter: &Path) -> anyhow::Result<u64> {
    let previous = match fs::read_to_string(counter) {
        Ok(text) => text.trim().parse()?,
        Err(_) => 0,
    };
    fs::write(counter, (previous + 1).to_string())?;
    Ok(previous)
}

fn register_counting_relay(executor: &mut TaskExecutor, dir: PathBuf, items: u64) {
    let center_dir = dir.clone();
    executor
        .on(StageEvent::LeftStart, move |ctx| async move {
            for n in 0..items {
                ctx.push_next_json(&n).await?;
            }
            anyhow::Ok(())
        })
        .on(StageEvent::CenterStart, move |ctx| {
            let dir = center_dir.clone();
            async move {
                let mut handled = 0;
                while !ctx.should_exit()? {
                    if let Some(n) = ctx.pop_json::<u64>().await? {
                        handled += 1;
                        if ctx.mode() == ExecutionMode::AssemblyLine {
                            ctx.push_next_json(&(n * 2)).await?;
                        }
                    }
                }
                record_count(&dir, &ctx, handled)
            }
        })
        .on(StageEvent::RightStart, move |ctx| {
            let dir = dir.clone();
            async move {
                let mut handled = 0;
                while !ctx.should_exit()? {
                    if ctx.pop_json::<u64>().await?.is_some() {
                        handled += 1;
                    }
                }
                record_count(&dir, &ctx, handled)
            }
        });
}

#[test]
#[serial]
fn batch_assembly_line_drains_every_item() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let spec = PipelineSpecBuilder::batch("e2e-batch")
        .workers(1, 2, 2)
        .timeout(Duration::from_millis(200))
        .shutdown_grace(Duration::from_secs(5))
        .queue_name(&unique_name("e2e-batch"))
        .build();
    let mut executor = TaskExecutor::new(spec);
    register_counting_relay(&mut executor, dir.path().to_path_buf(), 20);

    let report = executor.start()?;

    assert_eq!(report.kind, PipelineKind::Batch);
    assert_eq!(report.batch_status, Some(BatchStatus::RightFinish));
    assert_eq!(report.restarts, 0);
    assert!(!report.escalated);
    assert_eq!(report.spawned, 5);
    assert_eq!(total_count(dir.path(), "center")?, 20);
    assert_eq!(total_count(dir.path(), "right")?, 20);
    Ok(())
}

#[test]
#[serial]
fn batch_push_mode_ends_with_the_center_stage() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let spec = PipelineSpecBuilder::batch("e2e-push")
        .mode(ExecutionMode::Push)
        .workers(1, 3, 2)
        .timeout(Duration::from_millis(200))
        .queue_name(&unique_name("e2e-push"))
        .build();
    let mut executor = TaskExecutor::new(spec);
    register_counting_relay(&mut executor, dir.path().to_path_buf(), 12);

    let report = executor.start()?;

    assert_eq!(report.batch_status, Some(BatchStatus::CenterFinish));
    assert_eq!(report.spawned, 4);
    assert_eq!(total_count(dir.path(), "center")?, 12);
    assert_eq!(total_count(dir.path(), "right")?, 0);
    Ok(())
}

#[test]
#[serial]
fn daemon_restarts_a_crash_and_stops_on_request() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("crashed-once");

    let spec = PipelineSpecBuilder::daemon("e2e-daemon")
        .workers(1, 1, 1)
        .timeout(Duration::from_millis(200))
        .shutdown_grace(Duration::from_secs(5))
        .queue_name(&unique_name("e2e-daemon"))
        .build();
    let mut executor = TaskExecutor::new(spec);

    let right_dir = dir.path().to_path_buf();
    executor
        .on(StageEvent::LeftStart, |ctx| async move {
            let mut n = 0u64;
            while !ctx.should_exit()? {
                ctx.push_next_json(&n).await?;
                n += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            anyhow::Ok(())
        })
        .on(StageEvent::CenterStart, move |ctx| {
            let marker = marker.clone();
            async move {
                if !marker.exists() {
                    fs::write(&marker, b"1")?;
                    anyhow::bail!("first center run fails on purpose");
                }
                while !ctx.should_exit()? {
                    if let Some(n) = ctx.pop_json::<u64>().await? {
                        ctx.push_next_json(&n).await?;
                    }
                }
                anyhow::Ok(())
            }
        })
        .on(StageEvent::RightStart, move |ctx| {
            let dir = right_dir.clone();
            async move {
                let mut handled = 0;
                while !ctx.should_exit()? {
                    if ctx.pop_json::<u64>().await?.is_some() {
                        handled += 1;
                    }
                }
                record_count(&dir, &ctx, handled)
            }
        });

    let stop = executor.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(800));
        stop.stop()
    });

    let report = executor.start()?;
    assert!(stopper.join().map_err(|_| "stopper thread panicked")?);

    assert_eq!(report.kind, PipelineKind::Daemon);
    assert!(report.restarts >= 1, "the failing center is restarted");
    assert!(!report.escalated, "workers honour the immediate-exit flag");
    assert_eq!(report.spawned, 3 + report.restarts);
    assert!(
        fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("right")),
        "the right worker finished cleanly"
    );
    Ok(())
}

#[test]
#[serial]
fn callback_errors_and_panics_reach_the_error_handler_and_restart_the_worker() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let errors_dir = dir.path().join("errors");
    let counts_dir = dir.path().join("counts");
    fs::create_dir(&errors_dir)?;
    fs::create_dir(&counts_dir)?;
    let counter = dir.path().join("center-attempts");

    let spec = PipelineSpecBuilder::batch("e2e-errors")
        .mode(ExecutionMode::Push)
        .workers(1, 1, 0)
        .timeout(Duration::from_millis(200))
        .shutdown_grace(Duration::from_secs(5))
        .queue_name(&unique_name("e2e-errors"))
        .build();
    let mut executor = TaskExecutor::new(spec).with_error_handler(RecordingHandler {
        dir: errors_dir.clone(),
    });

    let center_counts = counts_dir.clone();
    executor
        .on(StageEvent::LeftStart, |ctx| async move {
            for n in 0..8u64 {
                ctx.push_next_json(&n).await?;
            }
            anyhow::Ok(())
        })
        .on(StageEvent::CenterStart, move |ctx| {
            let counter = counter.clone();
            let dir = center_counts.clone();
            async move {
                match next_attempt(&counter)? {
                    0 => anyhow::bail!("first center run fails on purpose"),
                    1 => panic!("second center run panics on purpose"),
                    _ => {}
                }
                let mut handled = 0;
                while !ctx.should_exit()? {
                    if ctx.pop_json::<u64>().await?.is_some() {
                        handled += 1;
                    }
                }
                record_count(&dir, &ctx, handled)
            }
        });

    let report = executor.start()?;

    assert_eq!(report.batch_status, Some(BatchStatus::CenterFinish));
    assert_eq!(report.restarts, 2, "each failed center run is replaced");
    assert_eq!(report.spawned, 4);
    assert_eq!(total_count(&counts_dir, "center")?, 8);

    let errors = recorded_errors(&errors_dir)?;
    assert_eq!(errors.len(), 2, "got {errors:?}");
    assert!(errors.iter().any(|e| e.contains("fails on purpose")), "got {errors:?}");
    assert!(errors.iter().any(|e| e.contains("panicked")), "got {errors:?}");
    Ok(())
}

#[test]
#[serial]
fn sigterm_stops_a_daemon_and_removes_its_queues() -> TestResult {
    init_tracing();
    let queue_name = unique_name("e2e-sigterm");

    let spec = PipelineSpecBuilder::daemon("e2e-sigterm")
        .workers(1, 1, 0)
        .timeout(Duration::from_millis(200))
        .shutdown_grace(Duration::from_secs(5))
        .queue_name(&queue_name)
        .build();
    let mut executor = TaskExecutor::new(spec);
    executor
        .on(StageEvent::LeftStart, |ctx| async move {
            let mut n = 0u64;
            while !ctx.should_exit()? {
                ctx.push_next_json(&n).await?;
                n += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            anyhow::Ok(())
        })
        .on(StageEvent::CenterStart, |ctx| async move {
            while !ctx.should_exit()? {
                ctx.pop_json::<u64>().await?;
            }
            anyhow::Ok(())
        });

    // Only the supervisor is signalled; workers learn through the table.
    let supervisor = getpid();
    let terminator = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(800));
        kill(supervisor, Signal::SIGTERM)
    });

    let report = executor.start()?;
    terminator.join().map_err(|_| "terminator thread panicked")??;

    assert_eq!(report.kind, PipelineKind::Daemon);
    assert_eq!(report.restarts, 0);
    assert!(!report.escalated, "workers honour the immediate-exit flag");

    let key = stage_queue_key(&queue_name, Stage::Center).ok_or("center has no queue key")?;
    // SAFETY: msgget without IPC_CREAT only looks the key up.
    let id = unsafe { libc::msgget(key, 0) };
    assert_eq!(id, -1, "center queue outlived the pipeline");
    Ok(())
}

#[test]
#[serial]
fn start_refuses_a_stage_without_a_callback() {
    let spec = PipelineSpecBuilder::batch("no-cb")
        .workers(1, 1, 0)
        .queue_name(&unique_name("no-cb"))
        .build();
    let mut executor = TaskExecutor::new(spec);
    executor.on(StageEvent::LeftStart, |_ctx| async move { anyhow::Ok(()) });

    let err = executor.start().err();
    assert!(matches!(err, Some(TasklineError::ConfigError(_))), "got {err:?}");
}

#[test]
#[serial]
fn state_table_is_shared_with_forked_children() -> TestResult {
    let table = SharedStateTable::create(&PipelineSpecBuilder::batch("fork").workers(1, 3, 0).build())?;

    // SAFETY: the child only touches the already-mapped table and exits.
    match unsafe { fork() }? {
        ForkResult::Child => {
            let code = match table.decrement_if_positive(StateKey::BatchCenterUnfinished) {
                Ok(Some(2)) => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None)?;
            assert_eq!(status, WaitStatus::Exited(child, 0));
        }
    }

    assert_eq!(table.get(StateKey::BatchCenterUnfinished)?, 2);
    Ok(())
}
