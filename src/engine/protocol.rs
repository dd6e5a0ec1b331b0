// src/engine/protocol.rs

//! Completion protocols layered on the shared state table.
//!
//! Both halves of each protocol live here:
//! - the supervisor half decides, for one observed exit, whether to restart
//!   the worker, retire it, or finish the whole pipeline;
//! - the worker half ([`try_finish_share`]) is what a worker runs between
//!   units of work to find out whether it may stop, writing the completion
//!   marker before it exits.
//!
//! Batch status only ever moves forward:
//! `Start -> LeftFinish -> CenterFinish -> RightFinish`.

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::ipc::{BatchStatus, SharedStateTable, StateKey};
use crate::pipeline::PipelineSpec;
use crate::types::{ExecutionMode, PipelineKind, Stage};

use super::WorkerOutcome;

/// What the supervisor does about one worker exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Treat as a crash: start a fresh worker at the same (stage, index).
    Restart,
    /// The worker finished its share; leave its slot empty.
    Retire,
    /// The pipeline is done; terminate the supervisor.
    Complete,
}

/// Dispatch to the protocol of `spec.kind`.
pub fn exit_decision(
    spec: &PipelineSpec,
    table: &SharedStateTable,
    stage: Stage,
    outcome: WorkerOutcome,
) -> Result<ExitDecision> {
    match spec.kind {
        PipelineKind::Batch => batch_exit_decision(spec, table, stage, outcome),
        PipelineKind::Daemon => daemon_exit_decision(table),
    }
}

/// Batch protocol, supervisor half.
pub fn batch_exit_decision(
    spec: &PipelineSpec,
    table: &SharedStateTable,
    stage: Stage,
    outcome: WorkerOutcome,
) -> Result<ExitDecision> {
    let status = table.batch_status()?;

    let decision = match (stage, status) {
        (Stage::Left, BatchStatus::Start) => {
            if !outcome.is_finished() {
                warn!(?outcome, "left worker exited abnormally; closing the left stage anyway");
            }
            table.set(StateKey::BatchStatus, BatchStatus::LeftFinish.raw())?;
            info!("left stage finished");
            advance_past_empty_stages(spec, table)?
        }
        (Stage::Center, status) if outcome.is_finished() => {
            let right_stage_absent = spec.mode == ExecutionMode::Push || spec.right == 0;
            if status >= BatchStatus::CenterFinish && right_stage_absent {
                ExitDecision::Complete
            } else {
                ExitDecision::Retire
            }
        }
        (Stage::Right, BatchStatus::RightFinish) if outcome.is_finished() => ExitDecision::Complete,
        (Stage::Right, _) if outcome.is_finished() => ExitDecision::Retire,
        _ => ExitDecision::Restart,
    };

    debug!(%stage, ?status, ?outcome, ?decision, "batch exit classified");
    Ok(decision)
}

/// Once the left stage is done, skip over stages that have no workers so the
/// pipeline cannot wait forever on a stage that will never report.
fn advance_past_empty_stages(spec: &PipelineSpec, table: &SharedStateTable) -> Result<ExitDecision> {
    if spec.center > 0 {
        return Ok(ExitDecision::Retire);
    }

    table.compare_and_set(
        StateKey::BatchStatus,
        BatchStatus::LeftFinish.raw(),
        BatchStatus::CenterFinish.raw(),
    )?;
    debug!("no center workers; center stage finished immediately");

    if spec.right > 0 {
        Ok(ExitDecision::Retire)
    } else {
        Ok(ExitDecision::Complete)
    }
}

/// Daemon protocol, supervisor half: restart everything until the one-way
/// immediate-exit flag is raised.
pub fn daemon_exit_decision(table: &SharedStateTable) -> Result<ExitDecision> {
    if table.immediate_exit_requested()? {
        Ok(ExitDecision::Complete)
    } else {
        Ok(ExitDecision::Restart)
    }
}

/// Worker half of both protocols.
///
/// Returns `true` when the calling worker may stop now. On the way it writes
/// the completion markers: it decrements its stage's unfinished counter, and
/// the worker that brings a batch counter to zero advances `batchStatus`.
///
/// `inbound_empty` is only consulted once the upstream stage is done.
/// Callers must not call this again after it returned `true`.
pub fn try_finish_share<F>(table: &SharedStateTable, stage: Stage, inbound_empty: F) -> Result<bool>
where
    F: FnOnce() -> Result<bool>,
{
    match table.kind() {
        PipelineKind::Daemon => {
            if !table.immediate_exit_requested()? {
                return Ok(false);
            }
            if let Some(counter) = StateKey::unfinished(PipelineKind::Daemon, stage) {
                table.decrement_if_positive(counter)?;
            }
            Ok(true)
        }
        PipelineKind::Batch => match stage {
            Stage::Left => Ok(true),
            Stage::Center => drain_batch_stage(
                table,
                BatchStatus::LeftFinish,
                StateKey::BatchCenterUnfinished,
                BatchStatus::CenterFinish,
                inbound_empty,
            ),
            Stage::Right => drain_batch_stage(
                table,
                BatchStatus::CenterFinish,
                StateKey::BatchRightUnfinished,
                BatchStatus::RightFinish,
                inbound_empty,
            ),
        },
    }
}

fn drain_batch_stage<F>(
    table: &SharedStateTable,
    upstream_done: BatchStatus,
    counter: StateKey,
    stage_done: BatchStatus,
    inbound_empty: F,
) -> Result<bool>
where
    F: FnOnce() -> Result<bool>,
{
    if table.batch_status()? < upstream_done {
        return Ok(false);
    }
    if !inbound_empty()? {
        return Ok(false);
    }

    match table.decrement_if_positive(counter)? {
        Some(0) => {
            table.compare_and_set(StateKey::BatchStatus, upstream_done.raw(), stage_done.raw())?;
            info!(counter = counter.as_str(), status = ?stage_done, "last worker of stage drained");
        }
        Some(remaining) => {
            debug!(counter = counter.as_str(), remaining, "worker drained; stage still busy");
        }
        None => {
            debug!(counter = counter.as_str(), "stage already drained");
        }
    }
    Ok(true)
}
