#![allow(dead_code)]

use std::time::Duration;

use taskline::config::{ConfigFile, PipelineSection, RawConfigFile};
use taskline::{ExecutionMode, PipelineKind, PipelineSpec};

/// Builder for `PipelineSpec` to simplify test setup.
///
/// `build()` normalizes, like `TaskExecutor::new` does; use `build_raw()`
/// to inspect the requested counts.
pub struct PipelineSpecBuilder {
    spec: PipelineSpec,
}

impl PipelineSpecBuilder {
    pub fn new(name: &str, kind: PipelineKind, mode: ExecutionMode) -> Self {
        Self {
            spec: PipelineSpec::new(name, kind, mode),
        }
    }

    pub fn batch(name: &str) -> Self {
        Self::new(name, PipelineKind::Batch, ExecutionMode::AssemblyLine)
    }

    pub fn daemon(name: &str) -> Self {
        Self::new(name, PipelineKind::Daemon, ExecutionMode::AssemblyLine)
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.spec.mode = mode;
        self
    }

    pub fn workers(mut self, left: usize, center: usize, right: usize) -> Self {
        self.spec.left = left;
        self.spec.center = center;
        self.spec.right = right;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.spec.shutdown_grace = grace;
        self
    }

    pub fn queue_name(mut self, queue_name: &str) -> Self {
        self.spec.queue_name = queue_name.to_string();
        self
    }

    pub fn build_raw(self) -> PipelineSpec {
        self.spec
    }

    pub fn build(self) -> PipelineSpec {
        self.spec.normalized()
    }
}

/// Builder for the `[pipeline]` section of a config file.
pub struct ConfigFileBuilder {
    section: PipelineSection,
}

impl ConfigFileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            section: PipelineSection {
                name: name.to_string(),
                kind: PipelineKind::default(),
                mode: ExecutionMode::default(),
                left: 0,
                center: 0,
                right: 0,
                timeout_secs: 5,
                queue_name: None,
                shutdown_grace_secs: 10,
            },
        }
    }

    pub fn kind(mut self, kind: PipelineKind) -> Self {
        self.section.kind = kind;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.section.mode = mode;
        self
    }

    pub fn workers(mut self, left: usize, center: usize, right: usize) -> Self {
        self.section.left = left;
        self.section.center = center;
        self.section.right = right;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.section.timeout_secs = secs;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        RawConfigFile {
            pipeline: self.section,
        }
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.raw()).expect("Failed to build valid config from builder")
    }
}
