// src/pipeline.rs

//! The immutable description of one pipeline run.

use std::time::Duration;

use crate::types::{ExecutionMode, PipelineKind, Stage};

/// Default grace period between a shutdown request and SIGKILL escalation.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default per-task timeout (queue send/receive wait).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline parameters as handed to the supervisor.
///
/// Construct one directly (or via the config loader) and call
/// [`PipelineSpec::normalized`] to apply the stage-count forcing rules.
/// [`crate::TaskExecutor::new`] always normalizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub name: String,
    pub kind: PipelineKind,
    pub mode: ExecutionMode,
    pub left: usize,
    pub center: usize,
    pub right: usize,
    pub timeout: Duration,
    /// Seed for the inter-stage queue keys.
    pub queue_name: String,
    pub shutdown_grace: Duration,
}

impl PipelineSpec {
    pub fn new(name: impl Into<String>, kind: PipelineKind, mode: ExecutionMode) -> Self {
        let name = name.into();
        Self {
            queue_name: name.clone(),
            name,
            kind,
            mode,
            left: 0,
            center: 0,
            right: 0,
            timeout: DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Apply the forcing rules. Never fails:
    /// - batch pipelines always have exactly one left worker;
    /// - push mode never has right workers.
    pub fn normalized(mut self) -> Self {
        if self.kind == PipelineKind::Batch {
            self.left = 1;
        }
        if self.mode == ExecutionMode::Push {
            self.right = 0;
        }
        self
    }

    pub fn count_of(&self, stage: Stage) -> usize {
        match stage {
            Stage::Left => self.left,
            Stage::Center => self.center,
            Stage::Right => self.right,
        }
    }

    pub fn total_workers(&self) -> usize {
        self.left + self.center + self.right
    }
}
