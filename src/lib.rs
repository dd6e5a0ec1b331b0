// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod executor;
pub mod ipc;
pub mod logging;
pub mod pipeline;
pub mod relay;
pub mod topology;
pub mod types;
pub mod worker;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::ipc::stage_queue_key;
use crate::topology::creation_order;

pub use crate::engine::PipelineReport;
pub use crate::errors::TasklineError;
pub use crate::executor::{StopHandle, TaskExecutor};
pub use crate::pipeline::PipelineSpec;
pub use crate::types::{ExecutionMode, PipelineKind, Stage, StageEvent};
pub use crate::worker::{ErrorHandler, WorkerContext};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - the demo relay callbacks
/// - the supervisor (which blocks until the pipeline terminates)
pub fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let spec = cfg.pipeline_spec();

    if args.dry_run {
        print_dry_run(&spec);
        return Ok(());
    }

    let mut executor = TaskExecutor::new(spec);
    relay::install(&mut executor, args.items);

    let report = executor.start()?;
    info!(
        name = %report.name,
        spawned = report.spawned,
        restarts = report.restarts,
        escalated = report.escalated,
        status = ?report.batch_status,
        "pipeline finished"
    );
    Ok(())
}

/// Simple dry-run output: print the normalized topology and creation order.
fn print_dry_run(spec: &PipelineSpec) {
    println!("taskline dry-run");
    println!("  pipeline.name = {}", spec.name);
    println!("  pipeline.kind = {:?}", spec.kind);
    println!("  pipeline.mode = {:?}", spec.mode);
    println!("  pipeline.timeout = {:?}", spec.timeout);
    println!("  pipeline.shutdown_grace = {:?}", spec.shutdown_grace);
    println!("  pipeline.queue_name = {}", spec.queue_name);
    println!();

    println!("stages:");
    for stage in [Stage::Left, Stage::Center, Stage::Right] {
        print!("  - {stage}: {} worker(s)", spec.count_of(stage));
        match stage_queue_key(&spec.queue_name, stage) {
            Some(key) => println!(", inbound queue key {key:#x}"),
            None => println!(),
        }
    }
    println!();

    let order = creation_order(spec);
    println!("creation order ({}):", order.len());
    for (stage, index) in order {
        println!("  - {stage} #{index}");
    }

    debug!("dry-run complete (no workers forked)");
}
