// src/relay.rs

//! Demo pipeline run by the `taskline` binary.
//!
//! The left stage emits numbered items, the center stage squares them and
//! either forwards them to the right stage (assembly line) or reports them
//! itself (push), and the right stage reports what it receives.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::executor::TaskExecutor;
use crate::types::{ExecutionMode, PipelineKind, StageEvent};
use crate::worker::WorkerContext;

/// Pause between items emitted by a daemon left worker.
const DAEMON_EMIT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayItem {
    pub seq: u64,
    pub value: u64,
    pub squared: Option<u64>,
}

/// Register the relay callbacks for all three stages.
pub fn install(executor: &mut TaskExecutor, items: u64) {
    executor
        .on(StageEvent::LeftStart, move |ctx| left(ctx, items))
        .on(StageEvent::CenterStart, center)
        .on(StageEvent::RightStart, right);
}

async fn left(ctx: WorkerContext, items: u64) -> anyhow::Result<()> {
    if ctx.next().is_none() {
        info!(index = ctx.index(), "no downstream stage; nothing to emit");
        return Ok(());
    }

    match ctx.kind() {
        PipelineKind::Batch => {
            for seq in 0..items {
                emit(&ctx, seq).await?;
            }
            info!(items, "left stage emitted all items");
        }
        PipelineKind::Daemon => {
            let mut seq = 0;
            while !ctx.should_exit()? {
                emit(&ctx, seq).await?;
                seq += 1;
                tokio::time::sleep(DAEMON_EMIT_INTERVAL).await;
            }
            info!(emitted = seq, "left stage stopping");
        }
    }
    Ok(())
}

async fn emit(ctx: &WorkerContext, seq: u64) -> anyhow::Result<()> {
    let item = RelayItem {
        seq,
        value: seq + 1,
        squared: None,
    };
    ctx.push_next_json(&item).await?;
    debug!(seq, "emitted");
    Ok(())
}

async fn center(ctx: WorkerContext) -> anyhow::Result<()> {
    let mut handled = 0u64;
    while !ctx.should_exit()? {
        let Some(mut item) = ctx.pop_json::<RelayItem>().await? else {
            continue;
        };
        item.squared = Some(item.value.saturating_mul(item.value));
        handled += 1;

        match (ctx.mode(), ctx.next()) {
            (ExecutionMode::AssemblyLine, Some(_)) => ctx.push_next_json(&item).await?,
            _ => info!(
                index = ctx.index(),
                seq = item.seq,
                squared = ?item.squared,
                "center stage result"
            ),
        }
    }
    info!(index = ctx.index(), handled, "center stage done");
    Ok(())
}

async fn right(ctx: WorkerContext) -> anyhow::Result<()> {
    let mut handled = 0u64;
    while !ctx.should_exit()? {
        if let Some(item) = ctx.pop_json::<RelayItem>().await? {
            handled += 1;
            info!(
                index = ctx.index(),
                seq = item.seq,
                squared = ?item.squared,
                "right stage result"
            );
        }
    }
    info!(index = ctx.index(), handled, "right stage done");
    Ok(())
}
