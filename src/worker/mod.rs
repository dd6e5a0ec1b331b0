// src/worker/mod.rs

//! Worker side of the pipeline.
//!
//! - [`callbacks`] holds the per-stage user callbacks and the error
//!   collaborator they report to.
//! - [`context`] is the `WorkerContext` each callback receives.
//! - [`process`] is the body of a forked worker process.

pub mod callbacks;
pub mod context;
pub mod process;

pub use callbacks::{ErrorHandler, LogErrorHandler, StageCallback, StageCallbacks, StageFuture, stage_callback};
pub use context::{PeerHandle, WorkerContext};
pub use process::{WorkerSeed, run_worker_process};
