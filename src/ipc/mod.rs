// src/ipc/mod.rs

//! Cross-process plumbing shared by the supervisor and its workers.
//!
//! - [`table`] is the fixed-key atomic counter/flag table in shared memory.
//! - [`queue`] wraps the System V message queues that connect adjacent
//!   stages.

pub mod queue;
pub mod table;

pub use queue::{InterStageQueue, MAX_MESSAGE_BYTES, PipelineQueues, queue_base_key, stage_queue_key};
pub use table::{BatchStatus, SharedStateTable, StateKey, TABLE_SLOTS};
