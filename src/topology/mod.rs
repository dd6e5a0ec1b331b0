// src/topology/mod.rs

//! Worker topology: who exists, in which stage, wired to which peers.
//!
//! - [`registry`] holds the live pid -> worker mapping the supervisor
//!   consults on every exit.
//! - [`plan`] computes the mandated creation order and resolves downstream
//!   peers for a worker about to be spawned.

pub mod plan;
pub mod registry;

pub use plan::{SpawnPlan, creation_order};
pub use registry::{PeerRef, WorkerRecord, WorkerRegistry};
