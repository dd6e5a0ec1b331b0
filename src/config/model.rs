// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::PipelineSpec;
use crate::types::{ExecutionMode, PipelineKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// name = "batch1"
/// kind = "batch"
/// mode = "assembly_line"
/// left = 1
/// center = 2
/// right = 2
/// timeout_secs = 5
/// ```
///
/// This is the unvalidated form; see [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub name: String,

    /// `"daemon"` (default) or `"batch"` (alias `"crontab"`).
    #[serde(default)]
    pub kind: PipelineKind,

    /// `"assembly_line"` (default) or `"push"`.
    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default)]
    pub left: usize,

    #[serde(default)]
    pub center: usize,

    #[serde(default)]
    pub right: usize,

    /// Queue send/receive wait, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seed for the inter-stage queue keys. Defaults to `name`.
    #[serde(default)]
    pub queue_name: Option<String>,

    /// Seconds between a shutdown request and SIGKILL escalation.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl PipelineSection {
    /// Convert to a (not yet normalized) `PipelineSpec`.
    pub fn to_spec(&self) -> PipelineSpec {
        let mut spec = PipelineSpec::new(self.name.clone(), self.kind, self.mode);
        spec.left = self.left;
        spec.center = self.center;
        spec.right = self.right;
        spec.timeout = Duration::from_secs(self.timeout_secs);
        spec.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        if let Some(queue_name) = &self.queue_name {
            spec.queue_name = queue_name.clone();
        }
        spec
    }
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holding one means
/// the pipeline section passed validation.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pipeline: PipelineSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(pipeline: PipelineSection) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &PipelineSection {
        &self.pipeline
    }

    /// The normalized spec the supervisor will run.
    pub fn pipeline_spec(&self) -> PipelineSpec {
        self.pipeline.to_spec().normalized()
    }
}
