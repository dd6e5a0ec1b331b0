// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::ipc::StateKey;
use crate::types::Stage;

#[derive(Error, Debug)]
pub enum TasklineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// An exit notification arrived for a pid the supervisor never spawned.
    #[error("exit notification for untracked worker pid {0}")]
    UnknownWorker(i32),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("state key {0:?} is not part of this pipeline's table")]
    UnknownStateKey(StateKey),

    #[error("no downstream peer from the {0} stage")]
    NoPeer(Stage),

    #[error("the {0} stage has no inbound queue")]
    NoInboundQueue(Stage),

    #[error("message of {len} bytes exceeds the {max}-byte queue limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("queue {key} stayed full for {waited_ms}ms")]
    QueueFull { key: i32, waited_ms: u128 },

    #[error("OS call failed: {0}")]
    Ipc(#[from] nix::Error),

    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TasklineError>;
