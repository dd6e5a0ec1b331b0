// tests/cli_args.rs

use std::path::PathBuf;

use clap::Parser;

use taskline::cli::{CliArgs, LogLevel};
use taskline::config::default_config_path;
use taskline::logging::directive_for;

#[test]
fn defaults_match_the_documented_values() {
    let args = CliArgs::try_parse_from(["taskline"]).expect("defaults should parse");
    assert_eq!(args.config, default_config_path());
    assert_eq!(args.config, PathBuf::from("Taskline.toml"));
    assert!(!args.dry_run);
    assert_eq!(args.items, 16);
    assert!(args.log_level.is_none());
}

#[test]
fn all_flags_parse() {
    let args = CliArgs::try_parse_from([
        "taskline",
        "--config",
        "pipelines/nightly.toml",
        "--dry-run",
        "--items",
        "3",
        "--log-level",
        "debug",
    ])
    .expect("flags should parse");

    assert_eq!(args.config, PathBuf::from("pipelines/nightly.toml"));
    assert!(args.dry_run);
    assert_eq!(args.items, 3);
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert_eq!(directive_for(LogLevel::Debug), "debug");
}

#[test]
fn unknown_log_level_is_rejected() {
    assert!(CliArgs::try_parse_from(["taskline", "--log-level", "loud"]).is_err());
}
