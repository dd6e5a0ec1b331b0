// src/worker/context.rs

//! What a stage callback gets to work with inside its worker process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::unistd::Pid;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::engine::protocol::try_finish_share;
use crate::errors::{Result, TasklineError};
use crate::ipc::{InterStageQueue, SharedStateTable};
use crate::topology::PeerRef;
use crate::types::{ExecutionMode, PipelineKind, Stage};

/// A downstream peer as seen by a worker: the peer stage's queue, plus the
/// worker that was live in that stage when this worker was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHandle {
    pub peer: PeerRef,
    pub queue: InterStageQueue,
}

/// Per-worker context handed to stage callbacks.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub(crate) name: String,
    pub(crate) kind: PipelineKind,
    pub(crate) mode: ExecutionMode,
    pub(crate) stage: Stage,
    pub(crate) index: usize,
    pub(crate) master_pid: Pid,
    pub(crate) pid: Pid,
    pub(crate) timeout: Duration,
    pub(crate) inbound: Option<InterStageQueue>,
    pub(crate) next: Option<PeerHandle>,
    pub(crate) after_next: Option<PeerHandle>,
    pub(crate) table: SharedStateTable,
    pub(crate) finished: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn master_pid(&self) -> Pid {
        self.master_pid
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// This worker's own inbound queue (center and right stages only).
    pub fn inbound(&self) -> Option<InterStageQueue> {
        self.inbound
    }

    pub fn next(&self) -> Option<&PeerHandle> {
        self.next.as_ref()
    }

    /// The peer two stages downstream; only left workers have one.
    pub fn after_next(&self) -> Option<&PeerHandle> {
        self.after_next.as_ref()
    }

    pub fn table(&self) -> &SharedStateTable {
        &self.table
    }

    fn inbound_queue(&self) -> Result<InterStageQueue> {
        self.inbound.ok_or(TasklineError::NoInboundQueue(self.stage))
    }

    fn next_queue(&self) -> Result<InterStageQueue> {
        self.next
            .map(|p| p.queue)
            .ok_or(TasklineError::NoPeer(self.stage))
    }

    fn after_next_queue(&self) -> Result<InterStageQueue> {
        self.after_next
            .map(|p| p.queue)
            .ok_or(TasklineError::NoPeer(self.stage))
    }

    /// Receive one message, waiting at most the pipeline timeout.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn pop(&self) -> Result<Option<Vec<u8>>> {
        self.inbound_queue()?.recv(self.timeout).await
    }

    pub async fn pop_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.inbound_queue()?.recv_json(self.timeout).await
    }

    pub async fn push_next(&self, payload: &[u8]) -> Result<()> {
        self.next_queue()?.send(payload, self.timeout).await
    }

    pub async fn push_next_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.next_queue()?.send_json(value, self.timeout).await
    }

    pub async fn push_after_next(&self, payload: &[u8]) -> Result<()> {
        self.after_next_queue()?.send(payload, self.timeout).await
    }

    pub async fn push_after_next_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.after_next_queue()?.send_json(value, self.timeout).await
    }

    /// Poll between units of work: may this worker stop now?
    ///
    /// - daemon: true once the immediate-exit flag is raised; the queue is
    ///   not drained.
    /// - batch center/right: true once the upstream stage has finished and
    ///   the inbound queue is empty. The last worker of a stage records the
    ///   stage as finished.
    /// - batch left: always true.
    ///
    /// Once this returns true the worker exits as finished; further calls
    /// keep returning true without touching the table again.
    pub fn should_exit(&self) -> Result<bool> {
        if self.is_finished() {
            return Ok(true);
        }

        let inbound = self.inbound;
        let done = try_finish_share(&self.table, self.stage, || match inbound {
            Some(queue) => queue.is_empty(),
            None => Ok(true),
        })?;

        if done {
            debug!(stage = %self.stage, index = self.index, "worker may exit");
            self.mark_finished();
        }
        Ok(done)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
