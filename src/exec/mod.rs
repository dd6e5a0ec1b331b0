// src/exec/mod.rs

//! Process layer.
//!
//! This module is responsible for actually creating worker processes and
//! turning their exits into `SupervisorEvent`s for the control loop.
//!
//! - [`backend`] provides the `WorkerBackend` trait and the concrete
//!   `ForkBackend` that the runtime uses in production, and which tests can
//!   replace with a fake implementation.
//! - [`reaper`] listens for SIGCHLD and the stop signals and forwards events.
//! - [`naming`] sets process names for `ps` visibility.

pub mod backend;
pub mod naming;
pub mod reaper;

pub use backend::{ForkBackend, WorkerBackend};
pub use reaper::{spawn_reaper, spawn_stop_listeners};
