// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `taskline`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskline",
    version,
    about = "Run a supervised left -> center -> right pipeline of worker processes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskline.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Parse + validate, print the topology, but don't fork any workers.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of items the demo relay's left stage emits.
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub items: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKLINE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
