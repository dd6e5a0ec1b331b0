use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which completion protocol a pipeline runs under.
///
/// - `Daemon`: runs until an external graceful-stop signal arrives; every
///   worker exit before that is treated as a crash and restarted.
/// - `Batch`: one-shot run that terminates the supervisor once the last
///   stage has drained (historically called "crontab").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Daemon,
    #[serde(alias = "crontab")]
    Batch,
}

impl Default for PipelineKind {
    fn default() -> Self {
        PipelineKind::Daemon
    }
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daemon" => Ok(PipelineKind::Daemon),
            "batch" | "crontab" => Ok(PipelineKind::Batch),
            other => Err(format!(
                "invalid pipeline kind: {other} (expected \"daemon\" or \"batch\")"
            )),
        }
    }
}

/// Whether the right stage exists and receives forwarded work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// left -> center -> right.
    AssemblyLine,
    /// left -> center; the center stage pushes results out of the pipeline.
    Push,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::AssemblyLine
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "assembly_line" => Ok(ExecutionMode::AssemblyLine),
            "push" => Ok(ExecutionMode::Push),
            other => Err(format!(
                "invalid execution mode: {other} (expected \"assembly_line\" or \"push\")"
            )),
        }
    }
}

/// One tier of the fixed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Left,
    Center,
    Right,
}

impl Stage {
    /// Stages in the order their workers must be created.
    pub const CREATION_ORDER: [Stage; 3] = [Stage::Right, Stage::Center, Stage::Left];

    /// The stage this one sends work to.
    pub fn downstream(self) -> Option<Stage> {
        match self {
            Stage::Left => Some(Stage::Center),
            Stage::Center => Some(Stage::Right),
            Stage::Right => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Left => "left",
            Stage::Center => "center",
            Stage::Right => "right",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup events a stage callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageEvent {
    LeftStart,
    CenterStart,
    RightStart,
}

impl StageEvent {
    pub fn stage(self) -> Stage {
        match self {
            StageEvent::LeftStart => Stage::Left,
            StageEvent::CenterStart => Stage::Center,
            StageEvent::RightStart => Stage::Right,
        }
    }
}

impl From<Stage> for StageEvent {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Left => StageEvent::LeftStart,
            Stage::Center => StageEvent::CenterStart,
            Stage::Right => StageEvent::RightStart,
        }
    }
}

impl FromStr for StageEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LeftStart" => Ok(StageEvent::LeftStart),
            "CenterStart" => Ok(StageEvent::CenterStart),
            "RightStart" => Ok(StageEvent::RightStart),
            other => Err(format!(
                "invalid stage event: {other} (expected LeftStart, CenterStart or RightStart)"
            )),
        }
    }
}
