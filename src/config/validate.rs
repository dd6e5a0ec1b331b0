// src/config/validate.rs

use crate::config::model::{ConfigFile, PipelineSection, RawConfigFile};
use crate::errors::{Result, TasklineError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TasklineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_pipeline(&raw.pipeline)?;
        Ok(ConfigFile::new_unchecked(raw.pipeline))
    }
}

fn validate_pipeline(section: &PipelineSection) -> Result<()> {
    ensure_named(section)?;
    validate_timeout(section)?;
    ensure_has_workers(section)?;
    Ok(())
}

fn ensure_named(section: &PipelineSection) -> Result<()> {
    if section.name.trim().is_empty() {
        return Err(TasklineError::ConfigError(
            "[pipeline].name must not be empty".to_string(),
        ));
    }
    if section.queue_name.as_deref().is_some_and(|q| q.is_empty()) {
        return Err(TasklineError::ConfigError(
            "[pipeline].queue_name must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_timeout(section: &PipelineSection) -> Result<()> {
    if section.timeout_secs == 0 {
        return Err(TasklineError::ConfigError(
            "[pipeline].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn ensure_has_workers(section: &PipelineSection) -> Result<()> {
    // Counts are checked after normalization: a batch pipeline always gets
    // its left worker, push mode never keeps right workers.
    let spec = section.to_spec().normalized();
    if spec.total_workers() == 0 {
        return Err(TasklineError::ConfigError(format!(
            "pipeline '{}' has no workers (left = {}, center = {}, right = {} after normalization)",
            spec.name, spec.left, spec.center, spec.right
        )));
    }
    Ok(())
}
