// src/config/mod.rs

//! Configuration loading and validation for taskline.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate the `[pipeline]` section and turn it into a `PipelineSpec`
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, PipelineSection, RawConfigFile};
